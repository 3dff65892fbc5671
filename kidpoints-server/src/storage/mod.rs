pub mod models;
pub mod schema;

use chrono::{NaiveDate, Utc};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::result::DatabaseErrorKind;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use kidpoints_shared::domain::default_event_types;
use models::{
    Event, EventChanges, EventType, EventTypeChanges, Family, NewEvent, NewEventType, NewFamily,
    NewNotificationSettings, NewProfile, NewPushSubscription, NewSession, NotificationSettings,
    Profile, PushSubscription,
};
use tracing::trace;
use uuid::Uuid;

/// Structured error type for all storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A Diesel ORM error (query failure, constraint violation, etc.)
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    /// Failed to acquire or build a connection from the pool.
    #[error("pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    /// A `spawn_blocking` task panicked or was cancelled.
    #[error("task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// A database migration failed to apply.
    #[error("migration error: {0}")]
    Migration(String),
}

impl StorageError {
    /// True when the underlying error is a UNIQUE constraint violation
    /// (duplicate login/email/endpoint). Handlers map these to 409.
    pub fn is_unique_violation(&self) -> bool {
        matches!(
            self,
            StorageError::Database(diesel::result::Error::DatabaseError(
                DatabaseErrorKind::UniqueViolation,
                _
            ))
        )
    }
}

/// Owned field set for inserting a profile row.
#[derive(Debug, Clone)]
pub struct ProfileArgs {
    pub id: String,
    pub email: Option<String>,
    pub login: Option<String>,
    pub name: String,
    pub password_hash: String,
    pub role: String,
    pub family_id: Option<String>,
    pub parent_id: Option<String>,
}

/// Owned field set for inserting an event row.
#[derive(Debug, Clone)]
pub struct EventArgs {
    pub child_id: String,
    pub event_type_id: Option<String>,
    pub custom_name: Option<String>,
    pub points: i32,
    pub note: String,
    pub date: NaiveDate,
    pub created_by: Option<String>,
    pub status: String,
}

#[derive(Clone)]
pub struct Store {
    pool: Pool<ConnectionManager<SqliteConnection>>,
}

impl Store {
    pub async fn connect_sqlite(path: &str) -> Result<Self, StorageError> {
        let url = path.to_string();
        let manager = ConnectionManager::<SqliteConnection>::new(url);
        let pool = Pool::builder().max_size(8).build(manager)?;

        // Run pending Diesel migrations on startup (auto-init empty DBs)
        {
            let pool_clone = pool.clone();
            tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
                const MIGRATIONS: EmbeddedMigrations = embed_migrations!();
                let mut conn = pool_clone.get()?;
                configure_sqlite_conn(&mut conn)?;
                conn.run_pending_migrations(MIGRATIONS)
                    .map_err(|e| StorageError::Migration(e.to_string()))?;
                Ok(())
            })
            .await??;
        }

        Ok(Store { pool })
    }

    // Families and profiles

    /// Creates the family and its owner profile in one transaction.
    pub async fn create_family_with_owner(
        &self,
        family_name: &str,
        owner: ProfileArgs,
    ) -> Result<(Family, Profile), StorageError> {
        use schema::{families, profiles};
        let pool = self.pool.clone();
        let family_name = family_name.to_string();
        tokio::task::spawn_blocking(move || -> Result<(Family, Profile), StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let family_id = Uuid::new_v4().to_string();
            conn.immediate_transaction(|conn| -> Result<(), StorageError> {
                let new_family = NewFamily {
                    id: &family_id,
                    name: &family_name,
                    created_by: Some(&owner.id),
                };
                diesel::insert_into(families::table)
                    .values(&new_family)
                    .execute(conn)?;
                let new_profile = NewProfile {
                    id: &owner.id,
                    email: owner.email.as_deref(),
                    login: owner.login.as_deref(),
                    name: &owner.name,
                    password_hash: &owner.password_hash,
                    role: &owner.role,
                    family_id: Some(&family_id),
                    parent_id: None,
                };
                diesel::insert_into(profiles::table)
                    .values(&new_profile)
                    .execute(conn)?;
                Ok(())
            })?;
            let family = families::table
                .filter(families::id.eq(&family_id))
                .first::<Family>(&mut conn)?;
            let profile = profiles::table
                .filter(profiles::id.eq(&owner.id))
                .first::<Profile>(&mut conn)?;
            Ok((family, profile))
        })
        .await?
    }

    pub async fn insert_profile(&self, args: ProfileArgs) -> Result<Profile, StorageError> {
        use schema::profiles;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Profile, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let new_profile = NewProfile {
                id: &args.id,
                email: args.email.as_deref(),
                login: args.login.as_deref(),
                name: &args.name,
                password_hash: &args.password_hash,
                role: &args.role,
                family_id: args.family_id.as_deref(),
                parent_id: args.parent_id.as_deref(),
            };
            diesel::insert_into(profiles::table)
                .values(&new_profile)
                .execute(&mut conn)?;
            Ok(profiles::table
                .filter(profiles::id.eq(&args.id))
                .first::<Profile>(&mut conn)?)
        })
        .await?
    }

    pub async fn find_profile(&self, id: &str) -> Result<Option<Profile>, StorageError> {
        use schema::profiles::dsl as p;
        let pool = self.pool.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<Profile>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(p::profiles
                .filter(p::id.eq(&id))
                .first::<Profile>(&mut conn)
                .optional()?)
        })
        .await?
    }

    pub async fn find_profile_by_email(
        &self,
        email: &str,
    ) -> Result<Option<Profile>, StorageError> {
        use schema::profiles::dsl as p;
        let pool = self.pool.clone();
        let email = email.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<Profile>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(p::profiles
                .filter(p::email.eq(&email))
                .first::<Profile>(&mut conn)
                .optional()?)
        })
        .await?
    }

    /// Resolves a bare login to its profile. The original system kept
    /// this behind a database function so child devices could sign in
    /// without knowing the synthetic email.
    pub async fn find_profile_by_login(
        &self,
        login: &str,
    ) -> Result<Option<Profile>, StorageError> {
        use schema::profiles::dsl as p;
        let pool = self.pool.clone();
        let login = login.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<Profile>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(p::profiles
                .filter(p::login.eq(&login))
                .first::<Profile>(&mut conn)
                .optional()?)
        })
        .await?
    }

    pub async fn list_family_profiles(
        &self,
        family_id: &str,
    ) -> Result<Vec<Profile>, StorageError> {
        use schema::profiles::dsl as p;
        let pool = self.pool.clone();
        let family = family_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Vec<Profile>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(p::profiles
                .filter(p::family_id.eq(&family))
                .order((p::role.asc(), p::name.asc()))
                .load::<Profile>(&mut conn)?)
        })
        .await?
    }

    pub async fn update_profile(
        &self,
        id: &str,
        name: Option<String>,
        login: Option<String>,
    ) -> Result<Option<Profile>, StorageError> {
        use schema::profiles::dsl as p;
        let pool = self.pool.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<Profile>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            if let Some(name) = &name {
                diesel::update(p::profiles.filter(p::id.eq(&id)))
                    .set(p::name.eq(name))
                    .execute(&mut conn)?;
            }
            if let Some(login) = &login {
                diesel::update(p::profiles.filter(p::id.eq(&id)))
                    .set(p::login.eq(login))
                    .execute(&mut conn)?;
            }
            Ok(p::profiles
                .filter(p::id.eq(&id))
                .first::<Profile>(&mut conn)
                .optional()?)
        })
        .await?
    }

    /// Dependent rows (events, subscriptions, settings) go with the
    /// profile via foreign-key cascade.
    pub async fn delete_profile(&self, id: &str) -> Result<bool, StorageError> {
        use schema::profiles::dsl as p;
        let pool = self.pool.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || -> Result<bool, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let deleted = diesel::delete(p::profiles.filter(p::id.eq(&id))).execute(&mut conn)?;
            Ok(deleted > 0)
        })
        .await?
    }

    pub async fn family_admin_ids(&self, family_id: &str) -> Result<Vec<String>, StorageError> {
        use schema::profiles::dsl as p;
        let pool = self.pool.clone();
        let family = family_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Vec<String>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(p::profiles
                .filter(p::family_id.eq(&family))
                .filter(p::role.eq_any(["owner", "admin"]))
                .select(p::id)
                .load::<String>(&mut conn)?)
        })
        .await?
    }

    // Event types

    /// Inserts the default reward/deduction templates, owned by the
    /// given admin, unless the family already has any. Returns the
    /// inserted count.
    pub async fn seed_default_event_types(
        &self,
        admin_id: &str,
        family_id: &str,
    ) -> Result<usize, StorageError> {
        use schema::event_types::dsl as et;
        let pool = self.pool.clone();
        let admin = admin_id.to_string();
        let family = family_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<usize, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let existing: i64 = et::event_types
                .filter(et::family_id.eq(&family))
                .count()
                .get_result(&mut conn)?;
            if existing > 0 {
                trace!(family_id = %family, "seed: family already has event types; skipping");
                return Ok(0);
            }
            let defaults = default_event_types();
            let ids: Vec<String> = defaults
                .iter()
                .map(|_| Uuid::new_v4().to_string())
                .collect();
            let rows: Vec<NewEventType> = defaults
                .iter()
                .zip(&ids)
                .map(|(d, id)| NewEventType {
                    id: id.as_str(),
                    admin_id: &admin,
                    family_id: Some(&family),
                    name: d.name,
                    default_points: d.default_points,
                    is_deduction: d.is_deduction,
                    icon: Some(d.icon),
                    sort_order: d.sort_order,
                })
                .collect();
            Ok(diesel::insert_into(et::event_types)
                .values(&rows)
                .execute(&mut conn)?)
        })
        .await?
    }

    pub async fn list_event_types(
        &self,
        family_id: &str,
    ) -> Result<Vec<EventType>, StorageError> {
        use schema::event_types::dsl as et;
        let pool = self.pool.clone();
        let family = family_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Vec<EventType>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(et::event_types
                .filter(et::family_id.eq(&family))
                .order(et::sort_order.asc())
                .load::<EventType>(&mut conn)?)
        })
        .await?
    }

    pub async fn get_event_type(&self, id: &str) -> Result<Option<EventType>, StorageError> {
        use schema::event_types::dsl as et;
        let pool = self.pool.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<EventType>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(et::event_types
                .filter(et::id.eq(&id))
                .first::<EventType>(&mut conn)
                .optional()?)
        })
        .await?
    }

    /// When `sort_order` is omitted the new template is appended after
    /// the family's current maximum.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_event_type(
        &self,
        admin_id: &str,
        family_id: &str,
        name: &str,
        default_points: i32,
        is_deduction: bool,
        icon: Option<String>,
        sort_order: Option<i32>,
    ) -> Result<EventType, StorageError> {
        use diesel::dsl::max;
        use schema::event_types::dsl as et;
        let pool = self.pool.clone();
        let admin = admin_id.to_string();
        let family = family_id.to_string();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || -> Result<EventType, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let order = match sort_order {
                Some(o) => o,
                None => {
                    let current: Option<i32> = et::event_types
                        .filter(et::family_id.eq(&family))
                        .select(max(et::sort_order))
                        .first::<Option<i32>>(&mut conn)?;
                    current.unwrap_or(0) + 1
                }
            };
            let id = Uuid::new_v4().to_string();
            let row = NewEventType {
                id: &id,
                admin_id: &admin,
                family_id: Some(&family),
                name: &name,
                default_points,
                is_deduction,
                icon: icon.as_deref(),
                sort_order: order,
            };
            diesel::insert_into(et::event_types)
                .values(&row)
                .execute(&mut conn)?;
            Ok(et::event_types
                .filter(et::id.eq(&id))
                .first::<EventType>(&mut conn)?)
        })
        .await?
    }

    pub async fn update_event_type(
        &self,
        id: &str,
        family_id: &str,
        changes: EventTypeChanges,
    ) -> Result<Option<EventType>, StorageError> {
        use schema::event_types::dsl as et;
        let pool = self.pool.clone();
        let id = id.to_string();
        let family = family_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<EventType>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            diesel::update(
                et::event_types
                    .filter(et::id.eq(&id))
                    .filter(et::family_id.eq(&family)),
            )
            .set(&changes)
            .execute(&mut conn)
            .or_else(ignore_empty_changeset)?;
            Ok(et::event_types
                .filter(et::id.eq(&id))
                .filter(et::family_id.eq(&family))
                .first::<EventType>(&mut conn)
                .optional()?)
        })
        .await?
    }

    pub async fn delete_event_type(
        &self,
        id: &str,
        family_id: &str,
    ) -> Result<bool, StorageError> {
        use schema::event_types::dsl as et;
        let pool = self.pool.clone();
        let id = id.to_string();
        let family = family_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<bool, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let deleted = diesel::delete(
                et::event_types
                    .filter(et::id.eq(&id))
                    .filter(et::family_id.eq(&family)),
            )
            .execute(&mut conn)?;
            Ok(deleted > 0)
        })
        .await?
    }

    /// Applies a drag-reorder batch atomically; entries outside the
    /// family are ignored by the filter.
    pub async fn reorder_event_types(
        &self,
        family_id: &str,
        orders: Vec<(String, i32)>,
    ) -> Result<(), StorageError> {
        use schema::event_types::dsl as et;
        let pool = self.pool.clone();
        let family = family_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            conn.immediate_transaction(|conn| -> Result<(), StorageError> {
                for (id, order) in &orders {
                    diesel::update(
                        et::event_types
                            .filter(et::id.eq(id))
                            .filter(et::family_id.eq(&family)),
                    )
                    .set(et::sort_order.eq(order))
                    .execute(conn)?;
                }
                Ok(())
            })
        })
        .await?
    }

    // Events

    pub async fn insert_event(&self, args: EventArgs) -> Result<Event, StorageError> {
        use schema::events;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Event, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let id = Uuid::new_v4().to_string();
            let row = NewEvent {
                id: &id,
                child_id: &args.child_id,
                event_type_id: args.event_type_id.as_deref(),
                custom_name: args.custom_name.as_deref(),
                points: args.points,
                note: &args.note,
                date: args.date,
                created_by: args.created_by.as_deref(),
                status: &args.status,
            };
            diesel::insert_into(events::table)
                .values(&row)
                .execute(&mut conn)?;
            Ok(events::table
                .filter(events::id.eq(&id))
                .first::<Event>(&mut conn)?)
        })
        .await?
    }

    pub async fn get_event(&self, id: &str) -> Result<Option<Event>, StorageError> {
        use schema::events::dsl as e;
        let pool = self.pool.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<Event>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(e::events
                .filter(e::id.eq(&id))
                .first::<Event>(&mut conn)
                .optional()?)
        })
        .await?
    }

    pub async fn update_event(
        &self,
        id: &str,
        changes: EventChanges,
    ) -> Result<Option<Event>, StorageError> {
        use schema::events::dsl as e;
        let pool = self.pool.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<Event>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            diesel::update(e::events.filter(e::id.eq(&id)))
                .set(&changes)
                .execute(&mut conn)
                .or_else(ignore_empty_changeset)?;
            Ok(e::events
                .filter(e::id.eq(&id))
                .first::<Event>(&mut conn)
                .optional()?)
        })
        .await?
    }

    /// Transitions `id` from `from` to `to` atomically; returns the
    /// updated row, or `None` when the event is missing or not in
    /// `from` (making approve/reject idempotent).
    pub async fn set_event_status(
        &self,
        id: &str,
        from: &str,
        to: &str,
    ) -> Result<Option<Event>, StorageError> {
        use schema::events::dsl as e;
        let pool = self.pool.clone();
        let id = id.to_string();
        let from = from.to_string();
        let to = to.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<Event>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let updated =
                diesel::update(e::events.filter(e::id.eq(&id)).filter(e::status.eq(&from)))
                    .set(e::status.eq(&to))
                    .execute(&mut conn)?;
            if updated == 0 {
                return Ok(None);
            }
            Ok(e::events
                .filter(e::id.eq(&id))
                .first::<Event>(&mut conn)
                .optional()?)
        })
        .await?
    }

    /// Deletes the event and returns the removed row so callers can
    /// tell whether a pending request disappeared.
    pub async fn delete_event(&self, id: &str) -> Result<Option<Event>, StorageError> {
        use schema::events::dsl as e;
        let pool = self.pool.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<Event>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            conn.immediate_transaction(|conn| -> Result<Option<Event>, StorageError> {
                let row = e::events
                    .filter(e::id.eq(&id))
                    .first::<Event>(conn)
                    .optional()?;
                if row.is_some() {
                    diesel::delete(e::events.filter(e::id.eq(&id))).execute(conn)?;
                }
                Ok(row)
            })
        })
        .await?
    }

    pub async fn list_child_events(
        &self,
        child_id: &str,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
        status: Option<String>,
    ) -> Result<Vec<Event>, StorageError> {
        use schema::events::dsl as e;
        let pool = self.pool.clone();
        let child = child_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Vec<Event>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let mut query = e::events.filter(e::child_id.eq(&child)).into_boxed();
            if let Some(from) = from {
                query = query.filter(e::date.ge(from));
            }
            if let Some(to) = to {
                query = query.filter(e::date.le(to));
            }
            if let Some(status) = &status {
                query = query.filter(e::status.eq(status));
            }
            Ok(query
                .order((e::date.desc(), e::created_at.desc()))
                .load::<Event>(&mut conn)?)
        })
        .await?
    }

    /// The balance rule: sum of approved event points for the child.
    /// Computed on demand, never cached.
    pub async fn compute_balance(&self, child_id: &str) -> Result<i64, StorageError> {
        use diesel::dsl::sum;
        use schema::events::dsl as e;
        let pool = self.pool.clone();
        let child = child_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<i64, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let total: Option<i64> = e::events
                .filter(e::child_id.eq(&child))
                .filter(e::status.eq("approved"))
                .select(sum(e::points))
                .first::<Option<i64>>(&mut conn)?;
            Ok(total.unwrap_or(0))
        })
        .await?
    }

    pub async fn list_pending_events(
        &self,
        family_id: &str,
    ) -> Result<Vec<Event>, StorageError> {
        use schema::{events, profiles};
        let pool = self.pool.clone();
        let family = family_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Vec<Event>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(events::table
                .inner_join(profiles::table.on(profiles::id.eq(events::child_id)))
                .filter(profiles::family_id.eq(&family))
                .filter(events::status.eq("pending"))
                .order(events::created_at.desc())
                .select(Event::as_select())
                .load::<Event>(&mut conn)?)
        })
        .await?
    }

    pub async fn pending_count(&self, family_id: &str) -> Result<i64, StorageError> {
        use schema::{events, profiles};
        let pool = self.pool.clone();
        let family = family_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<i64, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(events::table
                .inner_join(profiles::table.on(profiles::id.eq(events::child_id)))
                .filter(profiles::family_id.eq(&family))
                .filter(events::status.eq("pending"))
                .count()
                .get_result::<i64>(&mut conn)?)
        })
        .await?
    }

    // Push subscriptions

    pub async fn upsert_push_subscription(
        &self,
        user_id: &str,
        endpoint: &str,
        p256dh: &str,
        auth: &str,
    ) -> Result<PushSubscription, StorageError> {
        use schema::push_subscriptions::dsl as ps;
        let pool = self.pool.clone();
        let user_owned = user_id.to_string();
        let endpoint_owned = endpoint.to_string();
        let p256dh_owned = p256dh.to_string();
        let auth_owned = auth.to_string();
        trace!(
            user_id = %user_owned,
            endpoint = %endpoint_owned,
            "upsert_push_subscription starting"
        );
        tokio::task::spawn_blocking(move || -> Result<PushSubscription, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let now = Utc::now().naive_utc();
            let new_row = NewPushSubscription {
                user_id: &user_owned,
                endpoint: &endpoint_owned,
                p256dh: &p256dh_owned,
                auth: &auth_owned,
                created_at: now,
                updated_at: now,
            };
            diesel::insert_into(ps::push_subscriptions)
                .values(&new_row)
                .on_conflict((ps::user_id, ps::endpoint))
                .do_update()
                .set((
                    ps::p256dh.eq(&p256dh_owned),
                    ps::auth.eq(&auth_owned),
                    ps::updated_at.eq(now),
                    ps::last_error.eq::<Option<String>>(None::<String>),
                    ps::last_success_at
                        .eq::<Option<chrono::NaiveDateTime>>(None::<chrono::NaiveDateTime>),
                ))
                .execute(&mut conn)?;
            Ok(ps::push_subscriptions
                .filter(ps::user_id.eq(&user_owned))
                .filter(ps::endpoint.eq(&endpoint_owned))
                .first::<PushSubscription>(&mut conn)?)
        })
        .await?
    }

    pub async fn list_push_subscriptions_for_users(
        &self,
        user_ids: Vec<String>,
    ) -> Result<Vec<PushSubscription>, StorageError> {
        use schema::push_subscriptions::dsl as ps;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<PushSubscription>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(ps::push_subscriptions
                .filter(ps::user_id.eq_any(&user_ids))
                .order(ps::created_at.asc())
                .load::<PushSubscription>(&mut conn)?)
        })
        .await?
    }

    pub async fn delete_push_subscription(
        &self,
        user_id: &str,
        endpoint: &str,
    ) -> Result<bool, StorageError> {
        use schema::push_subscriptions::dsl as ps;
        let pool = self.pool.clone();
        let user_owned = user_id.to_string();
        let endpoint_owned = endpoint.to_string();
        tokio::task::spawn_blocking(move || -> Result<bool, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let deleted = diesel::delete(
                ps::push_subscriptions
                    .filter(ps::user_id.eq(&user_owned))
                    .filter(ps::endpoint.eq(&endpoint_owned)),
            )
            .execute(&mut conn)?;
            Ok(deleted > 0)
        })
        .await?
    }

    pub async fn mark_push_delivery_result(
        &self,
        id: i32,
        success: bool,
        error: Option<&str>,
    ) -> Result<(), StorageError> {
        use schema::push_subscriptions::dsl as ps;
        let pool = self.pool.clone();
        let error_owned = error.map(|s| s.to_string());
        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let now = Utc::now().naive_utc();
            if success {
                diesel::update(ps::push_subscriptions.filter(ps::id.eq(id)))
                    .set((
                        ps::updated_at.eq(now),
                        ps::last_success_at.eq(Some(now)),
                        ps::last_error.eq::<Option<String>>(None::<String>),
                    ))
                    .execute(&mut conn)?;
            } else {
                diesel::update(ps::push_subscriptions.filter(ps::id.eq(id)))
                    .set((
                        ps::updated_at.eq(now),
                        ps::last_error.eq(error_owned.as_deref()),
                    ))
                    .execute(&mut conn)?;
            }
            Ok(())
        })
        .await?
    }

    // Notification settings

    pub async fn get_notification_settings(
        &self,
        user_id: &str,
    ) -> Result<Option<NotificationSettings>, StorageError> {
        use schema::notification_settings::dsl as ns;
        let pool = self.pool.clone();
        let user = user_id.to_string();
        tokio::task::spawn_blocking(
            move || -> Result<Option<NotificationSettings>, StorageError> {
                let mut conn = pool.get()?;
                configure_sqlite_conn(&mut conn)?;
                Ok(ns::notification_settings
                    .filter(ns::user_id.eq(&user))
                    .first::<NotificationSettings>(&mut conn)
                    .optional()?)
            },
        )
        .await?
    }

    pub async fn notification_settings_for_users(
        &self,
        user_ids: Vec<String>,
    ) -> Result<Vec<NotificationSettings>, StorageError> {
        use schema::notification_settings::dsl as ns;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(
            move || -> Result<Vec<NotificationSettings>, StorageError> {
                let mut conn = pool.get()?;
                configure_sqlite_conn(&mut conn)?;
                Ok(ns::notification_settings
                    .filter(ns::user_id.eq_any(&user_ids))
                    .load::<NotificationSettings>(&mut conn)?)
            },
        )
        .await?
    }

    pub async fn upsert_notification_settings(
        &self,
        user_id: &str,
        child_requests: bool,
        request_results: bool,
        direct_changes: bool,
        sound: bool,
        vibration: bool,
    ) -> Result<NotificationSettings, StorageError> {
        use schema::notification_settings::dsl as ns;
        let pool = self.pool.clone();
        let user = user_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<NotificationSettings, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let now = Utc::now().naive_utc();
            let row = NewNotificationSettings {
                user_id: &user,
                child_requests,
                request_results,
                direct_changes,
                sound,
                vibration,
                updated_at: now,
            };
            diesel::insert_into(ns::notification_settings)
                .values(&row)
                .on_conflict(ns::user_id)
                .do_update()
                .set((
                    ns::child_requests.eq(child_requests),
                    ns::request_results.eq(request_results),
                    ns::direct_changes.eq(direct_changes),
                    ns::sound.eq(sound),
                    ns::vibration.eq(vibration),
                    ns::updated_at.eq(now),
                ))
                .execute(&mut conn)?;
            Ok(ns::notification_settings
                .filter(ns::user_id.eq(&user))
                .first::<NotificationSettings>(&mut conn)?)
        })
        .await?
    }

    // Session helpers for JWT inactivity windows

    pub async fn create_session(&self, jti_: &str, user_id_: &str) -> Result<(), StorageError> {
        use schema::sessions;
        let pool = self.pool.clone();
        let j = jti_.to_string();
        let u = user_id_.to_string();
        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let new = NewSession {
                jti: &j,
                user_id: &u,
            };
            diesel::insert_into(sessions::table)
                .values(&new)
                .on_conflict_do_nothing()
                .execute(&mut conn)?;
            Ok(())
        })
        .await?
    }

    pub async fn delete_session(&self, jti_: &str) -> Result<bool, StorageError> {
        use schema::sessions::dsl::*;
        let pool = self.pool.clone();
        let j = jti_.to_string();
        tokio::task::spawn_blocking(move || -> Result<bool, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let deleted = diesel::delete(sessions.filter(jti.eq(&j))).execute(&mut conn)?;
            Ok(deleted > 0)
        })
        .await?
    }

    /// Touch session atomically, but only if it hasn't expired.
    /// Returns `true` if the session was found and updated, `false` otherwise.
    ///
    /// This combines the idle timeout check and the `last_used_at` update into
    /// a single atomic UPDATE, eliminating the race condition between checking
    /// and updating the session.
    pub async fn touch_session_with_cutoff(
        &self,
        jti_: &str,
        cutoff: chrono::NaiveDateTime,
    ) -> Result<bool, StorageError> {
        use schema::sessions::dsl::*;
        let pool = self.pool.clone();
        let j = jti_.to_string();
        tokio::task::spawn_blocking(move || -> Result<bool, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let now = Utc::now().naive_utc();
            let updated =
                diesel::update(sessions.filter(jti.eq(&j)).filter(last_used_at.ge(cutoff)))
                    .set(last_used_at.eq(now))
                    .execute(&mut conn)?;
            Ok(updated > 0)
        })
        .await?
    }
}

/// Diesel raises `QueryBuilderError` when an `AsChangeset` update has
/// no fields to set; a PATCH with an empty body is still a valid no-op.
fn ignore_empty_changeset(err: diesel::result::Error) -> Result<usize, diesel::result::Error> {
    match err {
        diesel::result::Error::QueryBuilderError(_) => Ok(0),
        other => Err(other),
    }
}

fn configure_sqlite_conn(conn: &mut SqliteConnection) -> Result<(), diesel::result::Error> {
    // Enable WAL for better read/write concurrency and set a busy timeout
    // Ignore the result rows; Diesel's execute is fine for PRAGMAs
    diesel::sql_query("PRAGMA journal_mode=WAL;").execute(conn)?;
    diesel::sql_query("PRAGMA synchronous=NORMAL;").execute(conn)?;
    diesel::sql_query("PRAGMA busy_timeout=5000;").execute(conn)?;
    diesel::sql_query("PRAGMA foreign_keys=ON;").execute(conn)?;
    Ok(())
}

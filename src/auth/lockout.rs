//! Failed-login accounting.
//!
//! Each failure increments `failed_login_attempts`. Reaching the threshold
//! sets `locked_until = now + window` and resets the counter, so an account
//! gets a fresh set of attempts once the lock lapses. While locked, every
//! attempt is refused before the password is checked.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::schema::users;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    pub max_failures: i32,
    pub window: ChronoDuration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureOutcome {
    pub attempts: i32,
    pub locked_until: Option<NaiveDateTime>,
}

impl LockoutPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_failures: config.login_max_failures.max(1),
            window: ChronoDuration::minutes(config.login_lockout_minutes.max(1)),
        }
    }

    pub fn is_locked(&self, locked_until: Option<NaiveDateTime>, now: NaiveDateTime) -> bool {
        locked_until.is_some_and(|until| now < until)
    }

    /// Lock deadline once `attempts` failures have accumulated, if any.
    pub fn lock_after(&self, attempts: i32, now: NaiveDateTime) -> Option<NaiveDateTime> {
        (attempts >= self.max_failures).then(|| now + self.window)
    }

    pub fn record_failure(
        &self,
        conn: &mut PgConnection,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> QueryResult<FailureOutcome> {
        let now = now.naive_utc();
        conn.transaction(|conn| {
            let attempts: i32 = diesel::update(users::table.find(user_id))
                .set((
                    users::failed_login_attempts.eq(users::failed_login_attempts + 1),
                    users::updated_at.eq(now),
                ))
                .returning(users::failed_login_attempts)
                .get_result(conn)?;

            let locked_until = self.lock_after(attempts, now);
            if let Some(until) = locked_until {
                diesel::update(users::table.find(user_id))
                    .set((
                        users::locked_until.eq(Some(until)),
                        users::failed_login_attempts.eq(0),
                    ))
                    .execute(conn)?;
            }

            Ok(FailureOutcome {
                attempts,
                locked_until,
            })
        })
    }
}

pub fn record_success(
    conn: &mut PgConnection,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> QueryResult<usize> {
    let now = now.naive_utc();
    diesel::update(users::table.find(user_id))
        .set((
            users::failed_login_attempts.eq(0),
            users::locked_until.eq(None::<NaiveDateTime>),
            users::last_login_at.eq(Some(now)),
            users::updated_at.eq(now),
        ))
        .execute(conn)
}

/// Clears a lockout by email. Returns the number of accounts touched.
pub fn unlock_user(conn: &mut PgConnection, email: &str, now: DateTime<Utc>) -> QueryResult<usize> {
    diesel::update(users::table.filter(users::email.eq(email.trim().to_lowercase())))
        .set((
            users::failed_login_attempts.eq(0),
            users::locked_until.eq(None::<NaiveDateTime>),
            users::updated_at.eq(now.naive_utc()),
        ))
        .execute(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> LockoutPolicy {
        LockoutPolicy {
            max_failures: 5,
            window: ChronoDuration::minutes(15),
        }
    }

    #[test]
    fn locks_on_reaching_threshold() {
        let now = Utc::now().naive_utc();
        assert_eq!(policy().lock_after(4, now), None);
        assert_eq!(
            policy().lock_after(5, now),
            Some(now + ChronoDuration::minutes(15))
        );
    }

    #[test]
    fn lock_expires_at_deadline() {
        let now = Utc::now().naive_utc();
        let policy = policy();
        assert!(!policy.is_locked(None, now));
        assert!(policy.is_locked(Some(now + ChronoDuration::seconds(1)), now));
        assert!(!policy.is_locked(Some(now), now));
        assert!(!policy.is_locked(Some(now - ChronoDuration::minutes(1)), now));
    }
}

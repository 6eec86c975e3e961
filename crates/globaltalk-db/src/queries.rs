use crate::Database;
use crate::models::{CallRow, NewCallRecord, PointRow, SettlementEntry, UserRow};
use anyhow::{Result, anyhow};
use globaltalk_types::models::{PointKind, UserIdentity};
use rusqlite::{Connection, OptionalExtension};

impl Database {
    // -- Users --

    /// Mirror the identity snapshot received on authenticate. Reputation and
    /// created_at are preserved on conflict.
    pub fn upsert_user(&self, identity: &UserIdentity) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, email, nickname, profile_image, age_group, gender)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                     email = excluded.email,
                     nickname = excluded.nickname,
                     profile_image = excluded.profile_image,
                     age_group = excluded.age_group,
                     gender = excluded.gender",
                rusqlite::params![
                    identity.user_id,
                    identity.email,
                    identity.nickname,
                    identity.profile_image_ref,
                    identity.age_group,
                    identity.gender,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_user(&self, id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_id(conn, id))
    }

    pub fn get_nickname(&self, id: i64) -> Result<String> {
        self.with_conn(|conn| {
            conn.query_row("SELECT nickname FROM users WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .map_err(|_| anyhow!("User not found: {}", id))
        })
    }

    // -- Point ledger --

    /// Derived balance: the sum of every signed movement for the user.
    pub fn balance(&self, user_id: i64) -> Result<i64> {
        self.with_conn(|conn| Ok(balance_in(conn, user_id)?))
    }

    pub fn insert_entry(
        &self,
        user_id: i64,
        amount: i64,
        kind: PointKind,
        reason: &str,
        reference_type: Option<&str>,
        reference_id: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            insert_entry_in(
                conn,
                user_id,
                amount,
                kind.as_str(),
                reason,
                reference_type,
                reference_id,
            )?;
            Ok(())
        })
    }

    pub fn point_history(&self, user_id: i64) -> Result<Vec<PointRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, amount, kind, reason, reference_type, reference_id, created_at
                 FROM points
                 WHERE user_id = ?1
                 ORDER BY created_at DESC, id DESC",
            )?;

            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(PointRow {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        amount: row.get(2)?,
                        kind: row.get(3)?,
                        reason: row.get(4)?,
                        reference_type: row.get(5)?,
                        reference_id: row.get(6)?,
                        created_at: row.get(7)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Move `amount` points from sender to recipient as one transaction:
    /// either both entries land or neither does. Returns the new
    /// (sender, recipient) balances.
    pub fn transfer_gift(&self, sender: i64, recipient: i64, amount: i64) -> Result<(i64, i64)> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            insert_entry_in(
                &tx,
                sender,
                -amount,
                PointKind::Charge.as_str(),
                "gift_sent",
                Some("users"),
                Some(&recipient.to_string()),
            )?;
            insert_entry_in(
                &tx,
                recipient,
                amount,
                PointKind::Earn.as_str(),
                "gift_received",
                Some("users"),
                Some(&sender.to_string()),
            )?;

            let sender_balance = balance_in(&tx, sender)?;
            let recipient_balance = balance_in(&tx, recipient)?;

            tx.commit()?;
            Ok((sender_balance, recipient_balance))
        })
    }

    // -- Call history --

    /// Persist one settled session: the call record plus its ledger entries,
    /// all-or-nothing. Partial settlement is never observable.
    pub fn record_settlement(
        &self,
        call: &NewCallRecord,
        entries: &[SettlementEntry],
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "INSERT INTO call_history (
                     call_id, host_user_id, guest_user_id, call_type, language, topic,
                     started_at, ended_at, duration_secs, host_earnings, guest_charge,
                     host_exited_early, penalty_points, guest_grace, end_reason
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                rusqlite::params![
                    call.call_id,
                    call.host_user_id,
                    call.guest_user_id,
                    call.call_type.as_str(),
                    call.language,
                    call.topic,
                    call.started_at,
                    call.ended_at,
                    call.duration_secs,
                    call.host_earnings,
                    call.guest_charge,
                    call.host_exited_early,
                    call.penalty_points,
                    call.guest_grace,
                    call.end_reason.as_str(),
                ],
            )?;

            for entry in entries {
                insert_entry_in(
                    &tx,
                    entry.user_id,
                    entry.amount,
                    entry.kind.as_str(),
                    entry.reason,
                    Some("call_history"),
                    Some(&call.call_id),
                )?;
            }

            tx.commit()?;
            Ok(())
        })
    }

    /// Most recent call between the pair, in either host/guest orientation.
    /// Ratings anchor to this record.
    pub fn latest_call_between(&self, a: i64, b: i64) -> Result<Option<CallRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT call_id, host_user_id, guest_user_id, call_type, duration_secs,
                            end_reason, created_at
                     FROM call_history
                     WHERE (host_user_id = ?1 AND guest_user_id = ?2)
                        OR (host_user_id = ?2 AND guest_user_id = ?1)
                     ORDER BY created_at DESC, rowid DESC
                     LIMIT 1",
                    [a, b],
                    |row| {
                        Ok(CallRow {
                            call_id: row.get(0)?,
                            host_user_id: row.get(1)?,
                            guest_user_id: row.get(2)?,
                            call_type: row.get(3)?,
                            duration_secs: row.get(4)?,
                            end_reason: row.get(5)?,
                            created_at: row.get(6)?,
                        })
                    },
                )
                .optional()?;

            Ok(row)
        })
    }

    // -- Ratings --

    /// Insert a rating with its side effects in one transaction: reputation
    /// delta on the rated user, the reviewer reward entry, and the perfect
    /// score bonus. Returns false when (call_id, rater) was already rated.
    pub fn record_rating(
        &self,
        call_id: &str,
        rater_user_id: i64,
        rated_user_id: i64,
        score: i64,
        comment: Option<&str>,
        reputation_delta: f64,
        five_star_bonus: bool,
    ) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let existing: Option<i64> = tx
                .query_row(
                    "SELECT rating_id FROM ratings WHERE call_id = ?1 AND rater_user_id = ?2",
                    rusqlite::params![call_id, rater_user_id],
                    |row| row.get(0),
                )
                .optional()?;

            if existing.is_some() {
                return Ok(false);
            }

            tx.execute(
                "INSERT INTO ratings (call_id, rater_user_id, rated_user_id, rating_score, rating_comment)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![call_id, rater_user_id, rated_user_id, score, comment],
            )?;

            if reputation_delta != 0.0 {
                tx.execute(
                    "UPDATE users SET reputation = reputation + ?1 WHERE id = ?2",
                    rusqlite::params![reputation_delta, rated_user_id],
                )?;
            }

            insert_entry_in(
                &tx,
                rater_user_id,
                1,
                PointKind::Earn.as_str(),
                "rating_reward",
                Some("ratings"),
                Some(call_id),
            )?;

            if five_star_bonus {
                insert_entry_in(
                    &tx,
                    rated_user_id,
                    1,
                    PointKind::Earn.as_str(),
                    "five_star_bonus",
                    Some("ratings"),
                    Some(call_id),
                )?;
            }

            tx.commit()?;
            Ok(true)
        })
    }
}

fn query_user_by_id(conn: &Connection, id: i64) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, email, nickname, profile_image, age_group, gender, reputation, created_at
         FROM users WHERE id = ?1",
    )?;

    let row = stmt
        .query_row([id], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                email: row.get(1)?,
                nickname: row.get(2)?,
                profile_image: row.get(3)?,
                age_group: row.get(4)?,
                gender: row.get(5)?,
                reputation: row.get(6)?,
                created_at: row.get(7)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn balance_in(conn: &Connection, user_id: i64) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COALESCE(SUM(amount), 0) FROM points WHERE user_id = ?1",
        [user_id],
        |row| row.get(0),
    )
}

fn insert_entry_in(
    conn: &Connection,
    user_id: i64,
    amount: i64,
    kind: &str,
    reason: &str,
    reference_type: Option<&str>,
    reference_id: Option<&str>,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO points (user_id, amount, kind, reason, reference_type, reference_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![user_id, amount, kind, reason, reference_type, reference_id],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use globaltalk_types::models::{CallType, EndReason};

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        for (id, nickname) in [(1, "mina"), (2, "james")] {
            db.upsert_user(&UserIdentity {
                user_id: id,
                email: format!("{nickname}@example.com"),
                nickname: nickname.to_string(),
                profile_image_ref: None,
                age_group: Some(20),
                gender: None,
            })
            .unwrap();
        }
        db
    }

    fn call_record(call_id: &str, host: i64, guest: i64) -> NewCallRecord {
        NewCallRecord {
            call_id: call_id.to_string(),
            host_user_id: host,
            guest_user_id: guest,
            call_type: CallType::Audio,
            language: "english".into(),
            topic: "travel".into(),
            started_at: "2026-01-01T00:00:00Z".into(),
            ended_at: "2026-01-01T00:12:00Z".into(),
            duration_secs: 720,
            host_earnings: 12,
            guest_charge: 12,
            host_exited_early: false,
            penalty_points: 0,
            guest_grace: false,
            end_reason: EndReason::GuestLeft,
        }
    }

    #[test]
    fn balance_is_sum_of_entries() {
        let db = test_db();
        assert_eq!(db.balance(1).unwrap(), 0);

        db.insert_entry(1, 100, PointKind::Earn, "signup_bonus", None, None)
            .unwrap();
        db.insert_entry(1, -30, PointKind::Charge, "call_charge", None, None)
            .unwrap();
        db.insert_entry(1, 30, PointKind::Refund, "call_charge", None, None)
            .unwrap();

        assert_eq!(db.balance(1).unwrap(), 100);
        assert_eq!(db.point_history(1).unwrap().len(), 3);
    }

    #[test]
    fn gift_transfer_moves_points_atomically() {
        let db = test_db();
        db.insert_entry(1, 100, PointKind::Earn, "signup_bonus", None, None)
            .unwrap();

        let (sender_balance, recipient_balance) = db.transfer_gift(1, 2, 50).unwrap();
        assert_eq!(sender_balance, 50);
        assert_eq!(recipient_balance, 50);
        assert_eq!(db.balance(1).unwrap(), 50);
        assert_eq!(db.balance(2).unwrap(), 50);
    }

    #[test]
    fn failed_gift_leaves_neither_entry() {
        let db = test_db();
        db.insert_entry(1, 100, PointKind::Earn, "signup_bonus", None, None)
            .unwrap();

        // Recipient 99 has no user row, so the credit insert violates the
        // foreign key and the whole transaction rolls back.
        assert!(db.transfer_gift(1, 99, 50).is_err());
        assert_eq!(db.balance(1).unwrap(), 100);
        assert_eq!(db.balance(99).unwrap(), 0);
    }

    #[test]
    fn settlement_writes_call_and_entries_together() {
        let db = test_db();
        let call = call_record("call-1", 1, 2);
        let entries = vec![
            SettlementEntry {
                user_id: 1,
                amount: 12,
                kind: PointKind::Earn,
                reason: "call_earnings",
            },
            SettlementEntry {
                user_id: 2,
                amount: -12,
                kind: PointKind::Charge,
                reason: "call_charge",
            },
        ];

        db.record_settlement(&call, &entries).unwrap();

        assert_eq!(db.balance(1).unwrap(), 12);
        assert_eq!(db.balance(2).unwrap(), -12);

        let found = db.latest_call_between(1, 2).unwrap().unwrap();
        assert_eq!(found.call_id, "call-1");
        // The pair matches in either orientation.
        let reversed = db.latest_call_between(2, 1).unwrap().unwrap();
        assert_eq!(reversed.call_id, "call-1");
    }

    #[test]
    fn rating_is_unique_per_call_and_rater() {
        let db = test_db();
        db.record_settlement(&call_record("call-1", 1, 2), &[])
            .unwrap();

        let inserted = db
            .record_rating("call-1", 2, 1, 5, Some("great talk"), 0.1, true)
            .unwrap();
        assert!(inserted);

        // Reviewer reward and five-star bonus landed with the rating.
        assert_eq!(db.balance(2).unwrap(), 1);
        assert_eq!(db.balance(1).unwrap(), 1);
        let host = db.get_user(1).unwrap().unwrap();
        assert!((host.reputation - 36.6).abs() < 1e-9);

        let duplicate = db
            .record_rating("call-1", 2, 1, 3, None, 0.0, false)
            .unwrap();
        assert!(!duplicate);
        // The duplicate left no side effects behind.
        assert_eq!(db.balance(2).unwrap(), 1);
    }

    #[test]
    fn low_score_lowers_reputation_without_bonus() {
        let db = test_db();
        db.record_settlement(&call_record("call-1", 1, 2), &[])
            .unwrap();

        db.record_rating("call-1", 2, 1, 2, None, -0.1, false)
            .unwrap();

        let host = db.get_user(1).unwrap().unwrap();
        assert!((host.reputation - 36.4).abs() < 1e-9);
        assert_eq!(db.balance(1).unwrap(), 0);
        assert_eq!(db.balance(2).unwrap(), 1);
    }

    #[test]
    fn upsert_user_replaces_profile_fields() {
        let db = test_db();
        db.upsert_user(&UserIdentity {
            user_id: 1,
            email: "mina@example.com".into(),
            nickname: "mina_v2".into(),
            profile_image_ref: Some("avatar.png".into()),
            age_group: Some(30),
            gender: Some("f".into()),
        })
        .unwrap();

        let user = db.get_user(1).unwrap().unwrap();
        assert_eq!(user.nickname, "mina_v2");
        assert_eq!(user.age_group, Some(30));
        assert_eq!(db.get_nickname(1).unwrap(), "mina_v2");
    }
}

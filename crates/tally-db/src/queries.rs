use crate::Database;
use crate::models::{
    DemographicRow, EditOutcome, NewPoll, OptionRow, PollEdit, PollInsert, PollRow, VoteChange,
    VoteInsert, VoteRemoval, VoteRow, format_timestamp, parse_optional_timestamp, parse_status,
    parse_timestamp,
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Row, params};
use tally_types::models::{Gender, Member, MemberRole, PollStatus};

const POLL_COLUMNS: &str = "id, post_id, owner_id, title, status, created_at, updated_at, closed_at, reserved_close_at";

impl Database {
    // -- Members --

    /// Insert or refresh the local copy of a member's identity attributes.
    pub fn upsert_member(&self, member: &Member) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO member (id, role, age, gender) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                    role = excluded.role,
                    age = excluded.age,
                    gender = excluded.gender",
                params![
                    member.id,
                    member.role.as_str(),
                    member.age.map(i64::from),
                    member.gender.map(|g| g.as_str()),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_member(&self, id: i64) -> Result<Option<Member>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, role, age, gender FROM member WHERE id = ?1",
                [id],
                map_member,
            )
            .optional()
        })
    }

    // -- Polls --

    /// Create a poll and its options in one transaction.
    pub fn create_poll(&self, poll: &NewPoll) -> Result<PollInsert> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let created_at = format_timestamp(&poll.created_at);

            let inserted = tx.execute(
                "INSERT INTO poll (post_id, owner_id, title, status, created_at, updated_at, reserved_close_at)
                 VALUES (?1, ?2, ?3, 'ONGOING', ?4, ?4, ?5)",
                params![
                    poll.post_id,
                    poll.owner_id,
                    &poll.title,
                    &created_at,
                    poll.reserved_close_at.as_ref().map(format_timestamp),
                ],
            );
            match inserted {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => return Ok(PollInsert::PostTaken),
                Err(e) => return Err(e.into()),
            }

            let poll_id = tx.last_insert_rowid();
            for content in &poll.options {
                tx.execute(
                    "INSERT INTO poll_option (poll_id, content) VALUES (?1, ?2)",
                    params![poll_id, content],
                )?;
            }

            tx.commit()?;
            Ok(PollInsert::Created(poll_id))
        })
    }

    pub fn get_poll(&self, id: i64) -> Result<Option<PollRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM poll WHERE id = ?1", POLL_COLUMNS),
                [id],
                map_poll,
            )
            .optional()
        })
    }

    /// All polls, optionally filtered by stored status, oldest first.
    pub fn list_polls(&self, status: Option<PollStatus>) -> Result<Vec<PollRow>> {
        self.with_conn(|conn| query_polls(conn, status))
    }

    pub fn poll_id_for_post(&self, post_id: i64) -> Result<Option<i64>> {
        self.with_conn(|conn| {
            conn.query_row("SELECT id FROM poll WHERE post_id = ?1", [post_id], |row| {
                row.get(0)
            })
            .optional()
        })
    }

    /// Move an ONGOING poll to CLOSED. Returns false when the poll was already
    /// closed (or is gone), in which case the stored `closed_at` is untouched.
    pub fn close_poll_if_ongoing(&self, id: i64, closed_at: DateTime<Utc>) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE poll SET status = 'CLOSED', closed_at = ?1
                 WHERE id = ?2 AND status = 'ONGOING'",
                params![format_timestamp(&closed_at), id],
            )?;
            Ok(changed == 1)
        })
    }

    /// Administrative close: like `close_poll_if_ongoing`, but the reserved
    /// close time also collapses to `now`.
    pub fn close_poll_now(&self, id: i64, now: DateTime<Utc>) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let ts = format_timestamp(&now);
            let changed = conn.execute(
                "UPDATE poll SET status = 'CLOSED', closed_at = ?1, reserved_close_at = ?1, updated_at = ?1
                 WHERE id = ?2 AND status = 'ONGOING'",
                params![&ts, id],
            )?;
            Ok(changed == 1)
        })
    }

    /// Apply an owner edit. The vote check and the writes share one
    /// transaction on the writer, so no vote can slip in between them.
    pub fn edit_poll(&self, id: i64, edit: &PollEdit) -> Result<EditOutcome> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let status: Option<String> = tx
                .query_row("SELECT status FROM poll WHERE id = ?1", [id], |row| row.get(0))
                .optional()?;
            match status.as_deref() {
                None => return Ok(EditOutcome::NotFound),
                Some("CLOSED") => return Ok(EditOutcome::Closed),
                Some(_) => {}
            }

            let votes: i64 =
                tx.query_row("SELECT COUNT(*) FROM poll_vote WHERE poll_id = ?1", [id], |row| {
                    row.get(0)
                })?;
            if votes > 0 {
                return Ok(EditOutcome::HasVotes);
            }

            if let Some(title) = &edit.title {
                tx.execute("UPDATE poll SET title = ?1 WHERE id = ?2", params![title, id])?;
            }

            if let Some(reserved) = &edit.reserved_close_at {
                tx.execute(
                    "UPDATE poll SET reserved_close_at = ?1 WHERE id = ?2",
                    params![format_timestamp(reserved), id],
                )?;
            }

            if let Some(options) = &edit.options {
                let existing: Vec<i64> = {
                    let mut stmt = tx.prepare("SELECT id FROM poll_option WHERE poll_id = ?1")?;
                    let ids = stmt
                        .query_map([id], |row| row.get(0))?
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    ids
                };

                let incoming: Vec<i64> = options.iter().filter_map(|(oid, _)| *oid).collect();
                if let Some(foreign) = incoming.iter().find(|oid| !existing.contains(*oid)) {
                    return Ok(EditOutcome::ForeignOption(*foreign));
                }

                for oid in existing.iter().filter(|oid| !incoming.contains(*oid)) {
                    tx.execute("DELETE FROM poll_option WHERE id = ?1", [oid])?;
                }

                for (oid, content) in options {
                    match oid {
                        Some(oid) => {
                            tx.execute(
                                "UPDATE poll_option SET content = ?1 WHERE id = ?2",
                                params![content, oid],
                            )?;
                        }
                        None => {
                            tx.execute(
                                "INSERT INTO poll_option (poll_id, content) VALUES (?1, ?2)",
                                params![id, content],
                            )?;
                        }
                    }
                }
            }

            tx.execute(
                "UPDATE poll SET updated_at = ?1 WHERE id = ?2",
                params![format_timestamp(&edit.updated_at), id],
            )?;

            tx.commit()?;
            Ok(EditOutcome::Applied)
        })
    }

    /// Delete a poll. Options and votes go with it through `ON DELETE CASCADE`.
    pub fn delete_poll(&self, id: i64) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let deleted = conn.execute("DELETE FROM poll WHERE id = ?1", [id])?;
            Ok(deleted == 1)
        })
    }

    /// Poll ids with the most votes for a stored status. Polls without votes
    /// are not ranked.
    pub fn top_polls(&self, status: PollStatus, limit: u32) -> Result<Vec<(i64, u64)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT p.id, COUNT(v.id) AS votes
                 FROM poll p
                 JOIN poll_vote v ON v.poll_id = p.id
                 WHERE p.status = ?1
                 GROUP BY p.id
                 ORDER BY votes DESC, p.id ASC
                 LIMIT ?2",
            )?;

            let rows = stmt
                .query_map(params![status.as_str(), i64::from(limit)], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)? as u64))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Options --

    /// Options of a poll in insertion order; list position + 1 is the option index.
    pub fn get_options(&self, poll_id: i64) -> Result<Vec<OptionRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, poll_id, content FROM poll_option WHERE poll_id = ?1 ORDER BY id",
            )?;
            let rows = stmt
                .query_map([poll_id], map_option)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_option(&self, id: i64) -> Result<Option<OptionRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, poll_id, content FROM poll_option WHERE id = ?1",
                [id],
                map_option,
            )
            .optional()
        })
    }

    // -- Votes --

    pub fn find_vote(&self, poll_id: i64, member_id: i64) -> Result<Option<VoteRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, poll_id, option_id, member_id FROM poll_vote
                 WHERE poll_id = ?1 AND member_id = ?2",
                [poll_id, member_id],
                map_vote,
            )
            .optional()
        })
    }

    /// Insert a first vote. The row only lands while the poll is ONGOING, in
    /// the same statement, so a close that commits first always wins. A
    /// concurrent insert for the same member and poll surfaces as
    /// `VoteInsert::Duplicate` rather than an error.
    pub fn insert_vote(&self, poll_id: i64, option_id: i64, member_id: i64) -> Result<VoteInsert> {
        self.with_conn_mut(|conn| {
            let inserted = conn.execute(
                "INSERT INTO poll_vote (poll_id, option_id, member_id)
                 SELECT ?1, ?2, ?3
                 WHERE EXISTS (SELECT 1 FROM poll WHERE id = ?1 AND status = 'ONGOING')",
                [poll_id, option_id, member_id],
            );
            match inserted {
                Ok(0) => Ok(VoteInsert::Closed),
                Ok(_) => Ok(VoteInsert::Created(VoteRow {
                    id: conn.last_insert_rowid(),
                    poll_id,
                    option_id,
                    member_id,
                })),
                Err(e) if is_unique_violation(&e) => Ok(VoteInsert::Duplicate),
                Err(e) => Err(e.into()),
            }
        })
    }

    /// Point an existing vote at another option, only while its poll is ONGOING.
    pub fn update_vote_option(&self, vote_id: i64, option_id: i64) -> Result<VoteChange> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE poll_vote SET option_id = ?1
                 WHERE id = ?2
                   AND EXISTS (SELECT 1 FROM poll
                               WHERE poll.id = poll_vote.poll_id AND poll.status = 'ONGOING')",
                [option_id, vote_id],
            )?;
            if changed == 1 {
                return Ok(VoteChange::Applied);
            }

            let exists = conn
                .query_row("SELECT 1 FROM poll_vote WHERE id = ?1", [vote_id], |_| Ok(()))
                .optional()?
                .is_some();
            Ok(if exists { VoteChange::Closed } else { VoteChange::Missing })
        })
    }

    /// Withdraw a member's vote, only while the poll is ONGOING.
    pub fn delete_vote(&self, poll_id: i64, member_id: i64) -> Result<VoteRemoval> {
        self.with_conn_mut(|conn| {
            let deleted = conn.execute(
                "DELETE FROM poll_vote
                 WHERE poll_id = ?1 AND member_id = ?2
                   AND EXISTS (SELECT 1 FROM poll WHERE id = ?1 AND status = 'ONGOING')",
                [poll_id, member_id],
            )?;
            if deleted == 1 {
                return Ok(VoteRemoval::Removed);
            }

            match poll_status(conn, poll_id)? {
                Some(PollStatus::Ongoing) => Ok(VoteRemoval::NoVote),
                _ => Ok(VoteRemoval::Closed),
            }
        })
    }

    pub fn count_option_votes(&self, option_id: i64) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM poll_vote WHERE option_id = ?1",
                [option_id],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    pub fn count_poll_votes(&self, poll_id: i64) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM poll_vote WHERE poll_id = ?1",
                [poll_id],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    /// Per-option vote counts for a poll. Options without votes are absent.
    pub fn option_vote_counts(&self, poll_id: i64) -> Result<Vec<(i64, u64)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT option_id, COUNT(*) FROM poll_vote WHERE poll_id = ?1 GROUP BY option_id",
            )?;
            let rows = stmt
                .query_map([poll_id], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)? as u64))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Statistics --

    /// Group a poll's votes by option and the voter's raw gender and age.
    /// Votes from members missing in the projection come back with both NULL.
    pub fn demographic_rows(&self, poll_id: i64) -> Result<Vec<DemographicRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT v.option_id, m.gender, m.age, COUNT(*)
                 FROM poll_vote v
                 LEFT JOIN member m ON m.id = v.member_id
                 WHERE v.poll_id = ?1
                 GROUP BY v.option_id, m.gender, m.age",
            )?;
            let rows = stmt
                .query_map([poll_id], |row| {
                    Ok(DemographicRow {
                        option_id: row.get(0)?,
                        gender: row.get(1)?,
                        age: row.get(2)?,
                        count: row.get::<_, i64>(3)? as u64,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

/// Stored status of a poll, read on whichever connection the caller holds.
fn poll_status(conn: &Connection, poll_id: i64) -> Result<Option<PollStatus>> {
    conn.query_row("SELECT status FROM poll WHERE id = ?1", [poll_id], |row| {
        parse_status(0, &row.get::<_, String>(0)?)
    })
    .optional()
}

fn query_polls(conn: &Connection, status: Option<PollStatus>) -> Result<Vec<PollRow>> {
    let rows = match status {
        Some(status) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM poll WHERE status = ?1 ORDER BY id",
                POLL_COLUMNS
            ))?;
            let rows = stmt
                .query_map([status.as_str()], map_poll)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        }
        None => {
            let mut stmt = conn.prepare(&format!("SELECT {} FROM poll ORDER BY id", POLL_COLUMNS))?;
            let rows = stmt
                .query_map([], map_poll)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        }
    };
    Ok(rows)
}

fn map_poll(row: &Row<'_>) -> rusqlite::Result<PollRow> {
    Ok(PollRow {
        id: row.get(0)?,
        post_id: row.get(1)?,
        owner_id: row.get(2)?,
        title: row.get(3)?,
        status: parse_status(4, &row.get::<_, String>(4)?)?,
        created_at: parse_timestamp(5, &row.get::<_, String>(5)?)?,
        updated_at: parse_timestamp(6, &row.get::<_, String>(6)?)?,
        closed_at: parse_optional_timestamp(7, row.get(7)?)?,
        reserved_close_at: parse_optional_timestamp(8, row.get(8)?)?,
    })
}

fn map_option(row: &Row<'_>) -> rusqlite::Result<OptionRow> {
    Ok(OptionRow {
        id: row.get(0)?,
        poll_id: row.get(1)?,
        content: row.get(2)?,
    })
}

fn map_vote(row: &Row<'_>) -> rusqlite::Result<VoteRow> {
    Ok(VoteRow {
        id: row.get(0)?,
        poll_id: row.get(1)?,
        option_id: row.get(2)?,
        member_id: row.get(3)?,
    })
}

fn map_member(row: &Row<'_>) -> rusqlite::Result<Member> {
    let conversion = |idx: usize, e: tally_types::models::UnknownVariant| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
    };

    let role: String = row.get(1)?;
    let gender: Option<String> = row.get(3)?;
    Ok(Member {
        id: row.get(0)?,
        role: role.parse::<MemberRole>().map_err(|e| conversion(1, e))?,
        age: row.get(2)?,
        gender: gender
            .map(|g| g.parse::<Gender>())
            .transpose()
            .map_err(|e| conversion(3, e))?,
    })
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

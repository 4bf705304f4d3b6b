//! Token-usage ledger: one row per agent turn.

use rusqlite::params;

use crate::error::Result;
use crate::types::{CostSummary, NewUsage};
use crate::Store;

impl Store {
    pub fn record_usage(&self, usage: &NewUsage, now: i64) -> Result<()> {
        self.conn().execute(
            "INSERT INTO token_usage
             (chat_id, session_id, input_tokens, output_tokens, cache_read,
              cost_usd, did_compact, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                usage.chat_id,
                usage.session_id,
                usage.input_tokens as i64,
                usage.output_tokens as i64,
                usage.cache_read as i64,
                usage.cost_usd,
                usage.did_compact as i64,
                now,
            ],
        )?;
        Ok(())
    }

    /// `cache_read` of the most recent ledger row for a chat, 0 when none.
    /// Proxy for the session's current context occupancy.
    pub fn last_cache_read(&self, chat_id: i64) -> Result<u64> {
        let conn = self.conn();
        match conn.query_row(
            "SELECT cache_read FROM token_usage
             WHERE chat_id = ?1 ORDER BY id DESC LIMIT 1",
            [chat_id],
            |r| r.get::<_, i64>(0),
        ) {
            Ok(v) => Ok(v.max(0) as u64),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Turn count and token/cost sums over rows created at or after `since`.
    pub fn cost_summary(&self, chat_id: i64, since: i64) -> Result<CostSummary> {
        let conn = self.conn();
        conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(input_tokens), 0),
                    COALESCE(SUM(output_tokens), 0),
                    COALESCE(SUM(cost_usd), 0)
             FROM token_usage
             WHERE chat_id = ?1 AND created_at >= ?2",
            params![chat_id, since],
            |r| {
                Ok(CostSummary {
                    turns: r.get::<_, i64>(0)? as u64,
                    input_tokens: r.get::<_, i64>(1)? as u64,
                    output_tokens: r.get::<_, i64>(2)? as u64,
                    cost_usd: r.get(3)?,
                })
            },
        )
        .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(chat_id: i64, cache_read: u64, cost: f64) -> NewUsage {
        NewUsage {
            chat_id,
            session_id: Some("s".into()),
            input_tokens: 100,
            output_tokens: 50,
            cache_read,
            cost_usd: cost,
            did_compact: false,
        }
    }

    #[test]
    fn last_cache_read_tracks_newest_row() {
        let s = Store::open_in_memory().unwrap();
        assert_eq!(s.last_cache_read(1).unwrap(), 0);
        s.record_usage(&usage(1, 10_000, 0.01), 100).unwrap();
        s.record_usage(&usage(1, 160_000, 0.02), 200).unwrap();
        assert_eq!(s.last_cache_read(1).unwrap(), 160_000);
    }

    #[test]
    fn cost_summary_honours_the_window() {
        let s = Store::open_in_memory().unwrap();
        s.record_usage(&usage(1, 0, 0.10), 100).unwrap();
        s.record_usage(&usage(1, 0, 0.20), 500).unwrap();
        s.record_usage(&usage(2, 0, 5.00), 500).unwrap();

        let all = s.cost_summary(1, 0).unwrap();
        assert_eq!(all.turns, 2);
        assert_eq!(all.input_tokens, 200);
        assert!((all.cost_usd - 0.30).abs() < 1e-9);

        let recent = s.cost_summary(1, 200).unwrap();
        assert_eq!(recent.turns, 1);
        assert!((recent.cost_usd - 0.20).abs() < 1e-9);
    }

    #[test]
    fn empty_window_is_zeroed() {
        let s = Store::open_in_memory().unwrap();
        assert_eq!(s.cost_summary(9, 0).unwrap(), CostSummary::default());
    }
}

//! Typed command builders on [`Pool`].
//!
//! Each method only assembles a command and, for blocking calls, reads the
//! reply. Streaming variants return the session id the call went to; their
//! replies arrive on the sink from [`Pool::take_responses`].

use std::str::FromStr;

use mgw_proto::{names, Command};

use crate::error::{ClientError, ClientResult};
use crate::models::User;
use crate::pool::Pool;

impl Pool {
    /// Number of deals of `login` between `from` and `to` (unix seconds).
    pub async fn deals_total(&self, login: &str, from: i64, to: i64) -> ClientResult<u64> {
        let cmd = Command::new(names::DEAL_GET_TOTAL)
            .param("LOGIN", login)
            .param("FROM", from.to_string())
            .param("TO", to.to_string());
        let reply = self.call_checked(cmd).await?;
        reply_field(&reply, names::DEAL_GET_TOTAL, "TOTAL")
    }

    /// Requests one page of deals; the payload is a JSON array of `Deal`.
    pub async fn deals_page(&self, login: &str, from: i64, to: i64, offset: u64, total: u64) -> ClientResult<usize> {
        let cmd = Command::new(names::DEAL_GET_PAGE)
            .param("LOGIN", login)
            .param("FROM", from.to_string())
            .param("TO", to.to_string())
            .param("OFFSET", offset.to_string())
            .param("TOTAL", total.to_string());
        self.submit(cmd).await
    }

    /// Requests deals filtered by logins, groups or tickets.
    pub async fn deals_batch(
        &self,
        logins: &[&str],
        groups: &[&str],
        tickets: &[u64],
        from: i64,
        to: i64,
    ) -> ClientResult<usize> {
        let cmd = Command::new(names::DEAL_GET_BATCH)
            .param("LOGIN", logins.join(","))
            .param("GROUP", groups.join(","))
            .param("TICKET", join_tickets(tickets))
            .param("FROM", from.to_string())
            .param("TO", to.to_string());
        self.submit(cmd).await
    }

    pub async fn delete_deals(&self, tickets: &[u64]) -> ClientResult<()> {
        let cmd = Command::new(names::DEAL_DELETE).param("TICKET", join_tickets(tickets));
        self.call_checked(cmd).await.map(|_| ())
    }

    pub async fn positions_total(&self, login: &str) -> ClientResult<usize> {
        self.submit(Command::new(names::POSITION_GET_TOTAL).param("LOGIN", login))
            .await
    }

    pub async fn delete_positions(&self, tickets: &[u64]) -> ClientResult<()> {
        let cmd = Command::new(names::POSITION_DELETE).param("TICKET", join_tickets(tickets));
        self.call_checked(cmd).await.map(|_| ())
    }

    pub async fn orders_total(&self, login: &str) -> ClientResult<usize> {
        self.submit(Command::new(names::ORDER_GET_TOTAL).param("LOGIN", login))
            .await
    }

    /// Fetches one account record.
    pub async fn user_get(&self, login: &str) -> ClientResult<User> {
        let cmd = Command::new(names::USER_GET).param("LOGIN", login);
        self.call(cmd).await?.decode_payload()
    }

    pub async fn client_ids(&self, group: &str) -> ClientResult<usize> {
        self.submit(Command::new(names::CLIENT_IDS).param("GROUP", group))
            .await
    }

    /// Posts a balance operation and returns the deal ticket.
    ///
    /// `kind` is the deal action code, e.g. [`crate::models::DEAL_ACTION_BALANCE`].
    pub async fn trade_balance(&self, login: &str, kind: u8, amount: f64, comment: &str) -> ClientResult<u64> {
        let cmd = Command::new(names::TRADE_BALANCE)
            .param("LOGIN", login)
            .param("TYPE", kind.to_string())
            .param("BALANCE", format!("{amount:.6}"))
            .param("COMMENT", comment);
        let reply = self.call_checked(cmd).await?;
        reply_field(&reply, names::TRADE_BALANCE, "TICKET")
    }
}

fn join_tickets(tickets: &[u64]) -> String {
    tickets
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn reply_field<T>(reply: &Command, command: &str, field: &'static str) -> ClientResult<T>
where
    T: FromStr,
{
    reply
        .get(field)
        .and_then(|raw| raw.trim().parse().ok())
        .ok_or_else(|| ClientError::BadReply {
            command: command.to_string(),
            field,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tickets_join_with_commas() {
        assert_eq!(join_tickets(&[11, 12, 13]), "11,12,13");
        assert_eq!(join_tickets(&[]), "");
    }

    #[test]
    fn reply_field_parses_or_reports() {
        let reply = Command::new(names::DEAL_GET_TOTAL)
            .param("RETCODE", "0 Done")
            .param("TOTAL", "42");
        let total: u64 = reply_field(&reply, names::DEAL_GET_TOTAL, "TOTAL").unwrap();
        assert_eq!(total, 42);

        let err = reply_field::<u64>(&reply, names::TRADE_BALANCE, "TICKET").unwrap_err();
        assert!(matches!(err, ClientError::BadReply { field: "TICKET", .. }));
    }
}

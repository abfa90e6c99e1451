use std::fmt;
use std::str::FromStr;

/// Unique Process/Task ID, identifying one worker thread's lifetime
/// within a run. Serializes as:
///
/// `UPID:{node}:{pid:08X}:{pstart:08X}:{starttime:08X}:{worker_type}:{worker_id}:{username}:`
///
/// Mirrors the teacher's task UPID format, minus the node-cluster
/// fields this single-host tool has no use for (kept `node` itself
/// only for log-message parity across hosts in a migration).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UPID {
    pub pid: i32,
    pub pstart: u64,
    pub starttime: i64,
    pub worker_type: String,
    pub worker_id: Option<String>,
    pub username: String,
    pub node: String,
}

impl fmt::Display for UPID {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "UPID:{}:{:08X}:{:08X}:{:08X}:{}:{}:{}:",
            self.node,
            self.pid,
            self.pstart,
            self.starttime,
            self.worker_type,
            self.worker_id.as_deref().unwrap_or(""),
            self.username,
        )
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid UPID string: {0}")]
pub struct UpidParseError(String);

impl FromStr for UPID {
    type Err = UpidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix("UPID:")
            .ok_or_else(|| UpidParseError(s.to_string()))?;
        let parts: Vec<&str> = rest.split(':').collect();
        if parts.len() < 7 {
            return Err(UpidParseError(s.to_string()));
        }

        let node = parts[0].to_string();
        let pid = i32::from_str_radix(parts[1], 16).map_err(|_| UpidParseError(s.to_string()))?;
        let pstart =
            u64::from_str_radix(parts[2], 16).map_err(|_| UpidParseError(s.to_string()))?;
        let starttime =
            i64::from_str_radix(parts[3], 16).map_err(|_| UpidParseError(s.to_string()))?;
        let worker_type = parts[4].to_string();
        let worker_id = if parts[5].is_empty() {
            None
        } else {
            Some(parts[5].to_string())
        };
        let username = parts[6].to_string();

        Ok(UPID {
            pid,
            pstart,
            starttime,
            worker_type,
            worker_id,
            username,
            node,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_display_and_parse() {
        let upid = UPID {
            pid: 1234,
            pstart: 56,
            starttime: 0x5F5E100,
            worker_type: "copytable".to_string(),
            worker_id: Some("public.orders".to_string()),
            username: "pgxfer".to_string(),
            node: "migrator-01".to_string(),
        };

        let s = upid.to_string();
        let parsed: UPID = s.parse().expect("parses its own output");
        assert_eq!(parsed, upid);
    }

    #[test]
    fn rejects_missing_prefix() {
        assert!("not-a-upid".parse::<UPID>().is_err());
    }
}

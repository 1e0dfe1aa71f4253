use std::sync::Arc;

use chrono::DateTime;
use clap::Subcommand;
use outdial_core::{
    Config, ConnectionTracker, HttpBackend, KeyringCache, LinkCache, LinkError,
};

#[derive(Subcommand)]
pub enum CalendarAction {
    /// Create an Outlook calendar event through the linked account
    CreateEvent {
        /// Event subject line
        #[arg(long)]
        subject: String,
        /// Start time, RFC 3339 (e.g. 2026-08-04T15:00:00Z)
        #[arg(long)]
        start: String,
        /// End time, RFC 3339
        #[arg(long)]
        end: String,
        /// Optional body text
        #[arg(long)]
        body: Option<String>,
        /// Attendee email address (repeatable)
        #[arg(long)]
        attendee: Vec<String>,
    },
}

pub async fn run(action: CalendarAction) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let user_id = super::require_user_id(&config)?;
    let backend = Arc::new(HttpBackend::new(config.api.base_url.clone()));

    // The cached flag is advisory only; verify the link with the backend
    // before touching the calendar.
    let cache = LinkCache::new(Arc::new(KeyringCache::new()));
    let tracker = ConnectionTracker::new(backend.clone(), cache, user_id.clone());
    if !tracker.is_token_valid().await {
        return Err(LinkError::NotConnected.into());
    }

    match action {
        CalendarAction::CreateEvent {
            subject,
            start,
            end,
            body,
            attendee,
        } => {
            let start = DateTime::parse_from_rfc3339(&start)
                .map_err(|e| format!("invalid --start: {e}"))?;
            let end =
                DateTime::parse_from_rfc3339(&end).map_err(|e| format!("invalid --end: {e}"))?;
            if end <= start {
                return Err("--end must be after --start".into());
            }

            let event = serde_json::json!({
                "subject": subject,
                "start": start.to_rfc3339(),
                "end": end.to_rfc3339(),
                "body": body,
                "attendees": attendee,
            });
            let created = backend.create_calendar_event(&user_id, &event).await?;
            println!("{}", serde_json::to_string_pretty(&created)?);
        }
    }
    Ok(())
}

//! Reminder/notification seams. Sending reminder mail before expiration
//! and emitting an iCal attachment are named in the original's
//! `ws_expirer.cpp`/`email` helpers but out of scope for this rewrite;
//! both are kept as traits with a logging-only stub implementation so
//! the expirer's call sites read the same as a full implementation
//! would, and a real `lettre`/ical backend can be dropped in later
//! without touching `expire.rs`.

use crate::db::Entry;

pub trait Mailer {
    fn send_reminder(&self, entry: &Entry, days_remaining: i64) -> crate::error::Result<()>;
}

/// Logs what would have been sent instead of actually delivering mail.
pub struct NullMailer;

impl Mailer for NullMailer {
    fn send_reminder(&self, entry: &Entry, days_remaining: i64) -> crate::error::Result<()> {
        crate::logging::info(format!(
            "would send reminder mail to {} for workspace {} ({} day(s) remaining)",
            entry.mailaddress, entry.id, days_remaining
        ));
        Ok(())
    }
}

pub trait IcalBuilder {
    fn build(&self, entry: &Entry) -> String;
}

/// A minimal, single-event VCALENDAR body. Not attached to any mail yet
/// (no `Mailer` implementation sends attachments); kept as a seam for
/// when reminder mail gains a calendar attachment.
pub struct SingleEventIcal;

impl IcalBuilder for SingleEventIcal {
    fn build(&self, entry: &Entry) -> String {
        format!(
            "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nBEGIN:VEVENT\r\nSUMMARY:workspace {} expires\r\nDTSTART:{}\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n",
            entry.id, entry.expiration
        )
    }
}

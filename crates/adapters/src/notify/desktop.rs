// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Desktop notification adapter using notify-rust.
//!
//! Escalations surface here when an operator runs the bot on their own
//! machine; headless deployments use chat-channel notification instead.

use super::{NotifyAdapter, NotifyError};
use async_trait::async_trait;

#[derive(Clone, Copy, Debug, Default)]
pub struct DesktopNotifyAdapter;

impl DesktopNotifyAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NotifyAdapter for DesktopNotifyAdapter {
    async fn notify(&self, title: &str, message: &str) -> Result<(), NotifyError> {
        let title = title.to_string();
        let message = message.to_string();
        // Notification::show() can block on some platforms. Fire-and-forget
        // on tokio's bounded blocking pool so the escalation path never
        // stalls behind the notification daemon.
        tokio::task::spawn_blocking(move || {
            tracing::info!(%title, "sending desktop notification");
            if let Err(e) = notify_rust::Notification::new()
                .summary(&title)
                .body(&message)
                .show()
            {
                tracing::warn!(%title, error = %e, "desktop notification failed");
            }
        });
        Ok(())
    }
}

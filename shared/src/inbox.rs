use lru::LruCache;
use std::num::NonZeroUsize;
use std::rc::Rc;
use tracing::{debug, info, instrument};

use crate::capabilities::HttpMethod;
use crate::context::ClientContext;
use crate::error::{AppResult, ErrorKind};
use crate::event::NewCaseAlert;
use crate::model::{Notification, NotificationId};
use crate::MAX_SEEN_NOTIFICATIONS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgement {
    Removed,
    /// The server had already dropped it (another device, a double tap).
    AlreadyGone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Fresh,
    Duplicate,
}

/// Unread new-case notifications for a responder.
///
/// Pulled lists and pushed alerts race each other; every id either path has
/// produced lands in a bounded seen set, and a pushed alert whose id is
/// already there is dropped.
pub struct NotificationInbox {
    ctx: Rc<ClientContext>,
    items: Vec<Notification>,
    seen: LruCache<NotificationId, ()>,
}

impl NotificationInbox {
    pub fn new(ctx: Rc<ClientContext>) -> Self {
        Self::with_seen_capacity(ctx, MAX_SEEN_NOTIFICATIONS)
    }

    pub fn with_seen_capacity(ctx: Rc<ClientContext>, capacity: usize) -> Self {
        Self {
            ctx,
            items: Vec::new(),
            seen: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
        }
    }

    pub fn unread(&self) -> &[Notification] {
        &self.items
    }

    pub fn has_seen(&self, id: &NotificationId) -> bool {
        self.seen.contains(id)
    }

    #[instrument(skip(self))]
    pub async fn list_unread(&mut self) -> AppResult<&[Notification]> {
        let request = self
            .ctx
            .authorized(HttpMethod::Get, "/notifications/unread")?;
        let items: Vec<Notification> = self
            .ctx
            .send_json(request, "Could not load notifications")
            .await?;
        for item in &items {
            self.seen.put(item.id.clone(), ());
        }
        debug!(count = items.len(), "unread notifications pulled");
        self.items = items;
        Ok(&self.items)
    }

    /// Delete a notification on the server, then re-pull the list.
    #[instrument(skip(self))]
    pub async fn acknowledge(&mut self, id: &NotificationId) -> AppResult<Acknowledgement> {
        let request = self
            .ctx
            .authorized(HttpMethod::Delete, &format!("/notifications/{id}"))?;
        let outcome = match self
            .ctx
            .send_empty(request, "Could not dismiss the notification")
            .await
        {
            Ok(()) => Acknowledgement::Removed,
            Err(e) if e.kind == ErrorKind::NotFound => {
                debug!(%id, "notification already gone");
                Acknowledgement::AlreadyGone
            }
            Err(e) => return Err(e),
        };
        self.seen.put(id.clone(), ());
        self.list_unread().await?;
        Ok(outcome)
    }

    /// Record a pushed alert. Only `Fresh` alerts should reach the user.
    pub fn ingest(&mut self, alert: &NewCaseAlert) -> PushOutcome {
        if self.seen.contains(&alert.id) {
            debug!(id = %alert.id, "duplicate alert dropped");
            return PushOutcome::Duplicate;
        }
        self.seen.put(alert.id.clone(), ());

        if let Some(case) = &alert.case {
            if !self.items.iter().any(|n| n.id == alert.id) {
                self.items.push(Notification {
                    id: alert.id.clone(),
                    notifiable_id: None,
                    read_at: None,
                    created_at: Some(self.ctx.now()),
                    data: Some(case.clone()),
                });
            }
        }
        info!(id = %alert.id, "new case alert");
        PushOutcome::Fresh
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.seen.clear();
    }
}

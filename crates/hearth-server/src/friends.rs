//! Friend invites and friend lists.
//!
//! Notifications are pushed after the store write, still under the store
//! lock, and are never allowed to fail the operation.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use hearth_shared::identity::Identity;
use hearth_shared::protocol::{FriendInviteEvent, InviteNotice};
use hearth_shared::types::FriendshipStatus;
use hearth_store::{Database, Friendship, RemovedFriendship, StoreError};

use crate::connection::{ConnectionHandle, Delivery};
use crate::error::ServerError;
use crate::hub::ChatHub;
use crate::notify::NotificationRegistry;

/// A friend as listed to the client.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FriendSummary {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    /// Holds a live notification connection.
    pub active: bool,
}

#[derive(Clone)]
pub struct FriendService {
    db: Arc<Mutex<Database>>,
    notifications: NotificationRegistry,
    hub: ChatHub,
    cooldown: chrono::Duration,
}

impl FriendService {
    pub fn new(
        db: Arc<Mutex<Database>>,
        notifications: NotificationRegistry,
        hub: ChatHub,
        cooldown: chrono::Duration,
    ) -> Self {
        Self {
            db,
            notifications,
            hub,
            cooldown,
        }
    }

    /// Invite the user registered under `email`.
    ///
    /// A declined invite is replaced when the user who declined it invites
    /// back after the cooldown; pending or accepted pairs are conflicts.
    pub async fn send_invite(&self, inviter: &Identity, email: &str) -> Result<Friendship, ServerError> {
        let email = email.trim();
        if email.is_empty() {
            return Err(ServerError::Validation("Email is required".into()));
        }

        let mut db = self.db.lock().await;

        let invitee = db
            .find_user_by_email(email)?
            .ok_or_else(|| ServerError::NotFound(format!("No user registered with email {email}")))?;

        if invitee.id == inviter.id {
            return Err(ServerError::Conflict("You cannot invite yourself".into()));
        }

        let invite = match db.find_friendship_between(inviter.id, invitee.id)? {
            None => db.insert_friendship(inviter.id, invitee.id)?,
            Some(existing) => match existing.status {
                FriendshipStatus::Pending => {
                    return Err(ServerError::Conflict(format!(
                        "An invite between you and {} is already pending",
                        invitee.username
                    )))
                }
                FriendshipStatus::Accepted => {
                    return Err(ServerError::Conflict(format!(
                        "You are already friends with {}",
                        invitee.username
                    )))
                }
                FriendshipStatus::Declined => {
                    if existing.invitee_id != inviter.id {
                        return Err(ServerError::Conflict(format!(
                            "{} declined your invite",
                            invitee.username
                        )));
                    }
                    if Utc::now() - existing.requested_at < self.cooldown {
                        return Err(ServerError::Conflict(
                            "This invite was declined recently, try again later".into(),
                        ));
                    }
                    db.replace_friendship(existing.id, inviter.id, invitee.id)?
                }
            },
        };

        info!(invite = %invite.id, from = %inviter.id, to = %invite.invitee_id, "Friend invite sent");

        let event = FriendInviteEvent::NewFriendInvite {
            payload: notice(invite.id, inviter, invite.seen),
        };
        self.notifications.push(invite.invitee_id, &event).await;
        drop(db);

        Ok(invite)
    }

    pub async fn accept_invite(&self, user: &Identity, invite_id: Uuid) -> Result<Friendship, ServerError> {
        self.respond(user, invite_id, FriendshipStatus::Accepted).await
    }

    pub async fn decline_invite(&self, user: &Identity, invite_id: Uuid) -> Result<Friendship, ServerError> {
        self.respond(user, invite_id, FriendshipStatus::Declined).await
    }

    async fn respond(
        &self,
        user: &Identity,
        invite_id: Uuid,
        status: FriendshipStatus,
    ) -> Result<Friendship, ServerError> {
        let db = self.db.lock().await;

        let mut invite = match db.get_friendship(invite_id) {
            Ok(invite) => invite,
            Err(StoreError::NotFound) => return Err(invite_not_found()),
            Err(e) => return Err(e.into()),
        };
        if invite.status != FriendshipStatus::Pending {
            return Err(invite_not_found());
        }
        if invite.invitee_id != user.id {
            return Err(ServerError::Forbidden(
                "Only the invited user can respond to this invite".into(),
            ));
        }
        if !db.resolve_invite(invite_id, user.id, status)? {
            return Err(invite_not_found());
        }
        invite.status = status;

        info!(invite = %invite.id, user = %user.id, %status, "Friend invite resolved");

        let payload = notice(invite.id, user, invite.seen);
        let event = match status {
            FriendshipStatus::Accepted => FriendInviteEvent::FriendInviteAccepted { payload },
            _ => FriendInviteEvent::FriendInviteDeclined { payload },
        };
        self.notifications.push(invite.inviter_id, &event).await;
        drop(db);

        Ok(invite)
    }

    pub async fn mark_seen(&self, user: &Identity) -> Result<usize, ServerError> {
        Ok(self.db.lock().await.mark_invites_seen(user.id)?)
    }

    /// Queue the invite snapshot on `handle`, then register it as the user's
    /// notification connection.
    ///
    /// Invite pushes also run under the store lock, so the snapshot is always
    /// the first frame and no invite falls between it and the registration.
    pub async fn connect(&self, user_id: Uuid, handle: ConnectionHandle) -> Result<Delivery, ServerError> {
        let db = self.db.lock().await;
        let delivery = handle.try_send_json(&snapshot(&db, user_id)?);
        self.notifications.register(user_id, handle).await;
        drop(db);
        Ok(delivery)
    }

    pub async fn list_friends(&self, user: &Identity) -> Result<Vec<FriendSummary>, ServerError> {
        let friends = self.db.lock().await.list_friends(user.id)?;

        let mut summaries = Vec::with_capacity(friends.len());
        for friend in friends {
            let active = self.notifications.is_connected(friend.id).await;
            summaries.push(FriendSummary {
                id: friend.id,
                username: friend.username,
                email: friend.email,
                active,
            });
        }
        Ok(summaries)
    }

    /// Drop the friendship and the pair's private chat together, then close
    /// any live connections to that chat.
    pub async fn remove_friend(&self, user: &Identity, friend_id: Uuid) -> Result<RemovedFriendship, ServerError> {
        let removed = self
            .db
            .lock()
            .await
            .remove_friendship(user.id, friend_id)?
            .ok_or_else(|| ServerError::NotFound("You are not friends with this user".into()))?;

        info!(user = %user.id, friend = %friend_id, chat = ?removed.private_chat_id, "Friendship removed");

        if let Some(chat_id) = removed.private_chat_id {
            self.hub.close_chat(chat_id).await;
        }
        Ok(removed)
    }
}

fn notice(invite_id: Uuid, counterpart: &Identity, seen: bool) -> InviteNotice {
    InviteNotice {
        id: invite_id,
        username: counterpart.username.clone(),
        email: counterpart.email.clone(),
        seen,
    }
}

fn snapshot(db: &Database, user_id: Uuid) -> Result<FriendInviteEvent, ServerError> {
    let payload = db
        .pending_invites_for(user_id)?
        .into_iter()
        .map(|p| notice(p.invite.id, &p.inviter, p.invite.seen))
        .collect();
    Ok(FriendInviteEvent::AllFriendInvites { payload })
}

fn invite_not_found() -> ServerError {
    ServerError::NotFound("Pending invite not found".into())
}

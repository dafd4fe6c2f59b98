use chrono::{Duration, Utc};
use std::sync::Arc;
use validator::Validate;

use crate::auth::{Authorizer, RequestContext};
use crate::config::InvitationConfig;
use crate::dtos::user::SendInvitationRequest;
use crate::models::{Invitation, Page, Pagination, Right};
use crate::services::email::{EmailJob, EmailQueue};
use crate::services::store::Store;
use crate::services::ServiceError;
use crate::utils::{generate_secret, hash_token};

#[derive(Clone)]
pub struct InvitationService {
    store: Arc<dyn Store>,
    authz: Authorizer,
    emails: EmailQueue,
    config: InvitationConfig,
}

impl InvitationService {
    pub fn new(
        store: Arc<dyn Store>,
        authz: Authorizer,
        emails: EmailQueue,
        config: InvitationConfig,
    ) -> Self {
        Self {
            store,
            authz,
            emails,
            config,
        }
    }

    /// Invites `email` to register. An expired invitation for the address is
    /// replaced with a fresh token.
    pub async fn send(
        &self,
        ctx: &RequestContext,
        req: SendInvitationRequest,
    ) -> Result<Invitation, ServiceError> {
        self.authz.require_universal(ctx, Right::SendInvites).await?;
        req.validate()?;

        let now = Utc::now();
        let token = generate_secret();
        let expires_at = now + Duration::seconds(self.config.token_ttl_seconds as i64);

        let mut tx = self.store.begin().await?;
        let invitation = match tx.get_invitation(&req.email).await? {
            Some(existing) if existing.is_outstanding(now) || existing.accepted_by.is_some() => {
                return Err(ServiceError::InvitationAlreadySent { email: req.email });
            }
            Some(mut existing) => {
                existing.token_hash = hash_token(&token);
                existing.expires_at = expires_at;
                existing.updated_at = now;
                tx.update_invitation(&existing).await?;
                existing
            }
            None => {
                let invitation = Invitation::new(req.email.clone(), hash_token(&token), expires_at);
                tx.create_invitation(&invitation).await?;
                invitation
            }
        };
        tx.commit().await?;

        tracing::info!(email = %invitation.email, "Invitation sent");
        self.emails.submit(EmailJob::Invitation {
            to: invitation.email.clone(),
            token,
        });
        Ok(invitation)
    }

    pub async fn list(
        &self,
        ctx: &RequestContext,
        pagination: &Pagination,
    ) -> Result<Page<Invitation>, ServiceError> {
        self.authz.require_universal(ctx, Right::SendInvites).await?;
        let mut tx = self.store.begin().await?;
        Ok(tx.list_invitations(pagination).await?)
    }

    pub async fn delete(&self, ctx: &RequestContext, email: &str) -> Result<(), ServiceError> {
        self.authz.require_universal(ctx, Right::SendInvites).await?;
        let mut tx = self.store.begin().await?;
        if tx.get_invitation(email).await?.is_none() {
            return Err(ServiceError::not_found("invitation", email));
        }
        tx.delete_invitation(email).await?;
        tx.commit().await?;
        tracing::info!(email, "Invitation deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;
    use crate::models::{ApiKey, EntityId, Rights, State, User};
    use crate::services::email::{MockEmailService, SentEmail};
    use crate::services::store::MemoryStore;
    use crate::utils::hash_secret;

    struct Fixture {
        store: Arc<MemoryStore>,
        service: InvitationService,
        mail: MockEmailService,
        admin_key: String,
        user_key: String,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let admin_secret = generate_secret();
        let user_secret = generate_secret();
        let mut tx = store.begin().await.unwrap();
        let mut admin = User::new(
            "root-user".into(),
            "Admin".into(),
            "admin@example.com".into(),
            "hash".into(),
            State::Approved,
        );
        admin.admin = true;
        admin.primary_email_address_validated_at = Some(Utc::now());
        tx.create_user(&admin).await.unwrap();
        tx.create_user(&User::new(
            "u1".into(),
            "U1".into(),
            "u1@example.com".into(),
            "hash".into(),
            State::Approved,
        ))
        .await
        .unwrap();
        tx.create_api_key(&ApiKey::new(
            "K-ADMIN".into(),
            hash_secret(&admin_secret),
            EntityId::user("root-user"),
            String::new(),
            Rights::from([Right::All]),
            None,
        ))
        .await
        .unwrap();
        tx.create_api_key(&ApiKey::new(
            "K-USER".into(),
            hash_secret(&user_secret),
            EntityId::user("u1"),
            String::new(),
            Rights::from([Right::UserAll]),
            None,
        ))
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let mail = MockEmailService::new();
        let (queue, _) = EmailQueue::start(Arc::new(mail.clone()), 8, "http://localhost".into());
        let authz = Authorizer::new(store.clone(), AuthConfig::default(), None);
        Fixture {
            service: InvitationService::new(store.clone(), authz, queue, InvitationConfig::default()),
            store,
            mail,
            admin_key: format!("Bearer AK.K-ADMIN.{}", admin_secret),
            user_key: format!("Bearer AK.K-USER.{}", user_secret),
        }
    }

    fn ctx(token: &str) -> RequestContext {
        RequestContext::new(Some(token.to_string()))
    }

    fn invite(email: &str) -> SendInvitationRequest {
        SendInvitationRequest {
            email: email.into(),
        }
    }

    #[tokio::test]
    async fn test_send_requires_send_invites() {
        let f = fixture().await;
        let err = f
            .service
            .send(&ctx(&f.user_key), invite("new@example.com"))
            .await
            .unwrap_err();
        assert_eq!(err.name(), "insufficient_rights");

        f.service
            .send(&ctx(&f.admin_key), invite("new@example.com"))
            .await
            .unwrap();
        let sent = f.mail.wait_for(1).await;
        assert!(matches!(&sent[0], SentEmail::Invitation { to, .. } if to == "new@example.com"));
    }

    #[tokio::test]
    async fn test_outstanding_invitation_is_not_resent() {
        let f = fixture().await;
        let c = ctx(&f.admin_key);
        f.service.send(&c, invite("new@example.com")).await.unwrap();
        let err = f
            .service
            .send(&c, invite("new@example.com"))
            .await
            .unwrap_err();
        assert_eq!(err.name(), "invitation_already_sent");

        {
            let mut tx = f.store.begin().await.unwrap();
            let mut invitation = tx.get_invitation("new@example.com").await.unwrap().unwrap();
            invitation.expires_at = Utc::now() - Duration::minutes(1);
            tx.update_invitation(&invitation).await.unwrap();
            tx.commit().await.unwrap();
        }
        let renewed = f.service.send(&c, invite("new@example.com")).await.unwrap();
        assert!(renewed.is_outstanding(Utc::now()));
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let f = fixture().await;
        let c = ctx(&f.admin_key);
        f.service.send(&c, invite("a@example.com")).await.unwrap();
        f.service.send(&c, invite("b@example.com")).await.unwrap();
        let page = f.service.list(&c, &Pagination::default()).await.unwrap();
        assert_eq!(page.total, 2);

        f.service.delete(&c, "a@example.com").await.unwrap();
        let err = f.service.delete(&c, "a@example.com").await.unwrap_err();
        assert_eq!(err.name(), "invitation_not_found");
    }
}

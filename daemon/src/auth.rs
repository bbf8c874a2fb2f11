/// Authentication and authorization
use crate::config::AuthConfig;
use crate::errors::{DaemonError, DaemonResult};
use crate::types::AuthToken;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use qcflow_core::{Actor, ActorId, Capability, ProjectId, Role, WorkflowError};
use serde::{Deserialize, Serialize};

/// JWT claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Actor ID
    pub sub: String,
    pub username: String,
    pub role: Role,
    /// Projects the actor may see; ignored for admins
    #[serde(default)]
    pub projects: Vec<ProjectId>,
    pub iss: String,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    /// Actor described by these claims
    pub fn actor(&self) -> DaemonResult<Actor> {
        let id: ActorId = self
            .sub
            .parse()
            .map_err(|_| DaemonError::AuthError(format!("Invalid subject: {}", self.sub)))?;
        Ok(Actor::new(id, self.username.clone(), self.role))
    }
}

/// Authentication manager
pub struct AuthManager {
    config: AuthConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl AuthManager {
    /// Create a new authentication manager
    pub fn new(config: AuthConfig) -> DaemonResult<Self> {
        if config.jwt_secret.is_empty() {
            return Err(DaemonError::ConfigError(
                "JWT secret must not be empty".to_string(),
            ));
        }
        let encoding_key = EncodingKey::from_secret(config.jwt_secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.jwt_secret.as_bytes());
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[config.issuer.as_str()]);
        Ok(AuthManager {
            config,
            encoding_key,
            decoding_key,
            validation,
        })
    }

    /// Generate a token for an actor
    pub fn generate_token(&self, actor: &Actor, projects: Vec<ProjectId>) -> DaemonResult<AuthToken> {
        let now = Utc::now();
        let exp = now + Duration::seconds(self.config.token_expiry_secs as i64);

        let claims = Claims {
            sub: actor.id.to_string(),
            username: actor.username.clone(),
            role: actor.role,
            projects,
            iss: self.config.issuer.clone(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| DaemonError::AuthError(format!("Token generation failed: {}", e)))?;

        Ok(AuthToken {
            token,
            expires_at: exp,
            actor_id: actor.id,
        })
    }

    /// Verify a token
    pub fn verify_token(&self, token: &str) -> DaemonResult<Claims> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| DaemonError::AuthError(format!("Token verification failed: {}", e)))
    }

    /// Verify a token and build the request context
    pub fn authenticate(&self, token: Option<&str>) -> DaemonResult<AuthContext> {
        let token = token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| DaemonError::AuthError("Missing credential".to_string()))?;
        let claims = self.verify_token(token)?;
        Ok(AuthContext::new(claims.actor()?, claims.projects))
    }
}

/// Verified caller of one request
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub actor: Actor,
    pub projects: Vec<ProjectId>,
}

impl AuthContext {
    pub fn new(actor: Actor, projects: Vec<ProjectId>) -> Self {
        AuthContext { actor, projects }
    }

    /// Check whether the actor's role grants a capability
    pub fn can(&self, capability: Capability) -> bool {
        self.actor.role.can(capability)
    }

    /// Admins see every project
    pub fn can_access_project(&self, project_id: ProjectId) -> bool {
        self.actor.role == Role::Admin || self.projects.contains(&project_id)
    }

    pub fn require(&self, capability: Capability) -> DaemonResult<()> {
        if self.can(capability) {
            Ok(())
        } else {
            Err(WorkflowError::Forbidden(format!(
                "role {} lacks {:?} capability",
                self.actor.role, capability
            ))
            .into())
        }
    }

    pub fn require_project(&self, project_id: ProjectId) -> DaemonResult<()> {
        if self.can_access_project(project_id) {
            Ok(())
        } else {
            Err(WorkflowError::Forbidden(format!(
                "actor {} has no access to project {}",
                self.actor.id, project_id
            ))
            .into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> AuthManager {
        AuthManager::new(AuthConfig {
            jwt_secret: "test-secret".to_string(),
            token_expiry_secs: 3600,
            issuer: "qcflow".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn test_token_round_trip() {
        let manager = manager();
        let alice = Actor::new(7, "alice", Role::Drafter);
        let token = manager.generate_token(&alice, vec![1, 2]).unwrap();
        assert_eq!(token.actor_id, 7);

        let ctx = manager.authenticate(Some(&token.token)).unwrap();
        assert_eq!(ctx.actor, alice);
        assert_eq!(ctx.projects, vec![1, 2]);
    }

    #[test]
    fn test_token_from_other_secret_rejected() {
        let other = AuthManager::new(AuthConfig {
            jwt_secret: "another-secret".to_string(),
            ..AuthConfig::default()
        })
        .unwrap();
        let token = other
            .generate_token(&Actor::new(1, "mallory", Role::Admin), vec![])
            .unwrap();

        assert!(matches!(
            manager().verify_token(&token.token),
            Err(DaemonError::AuthError(_))
        ));
    }

    #[test]
    fn test_wrong_issuer_rejected() {
        let other = AuthManager::new(AuthConfig {
            jwt_secret: "test-secret".to_string(),
            token_expiry_secs: 3600,
            issuer: "someone-else".to_string(),
        })
        .unwrap();
        let token = other
            .generate_token(&Actor::new(1, "alice", Role::Drafter), vec![1])
            .unwrap();
        assert!(manager().verify_token(&token.token).is_err());
    }

    #[test]
    fn test_missing_credential() {
        assert!(matches!(
            manager().authenticate(None),
            Err(DaemonError::AuthError(_))
        ));
        assert!(manager().authenticate(Some("")).is_err());
        assert!(manager().authenticate(Some("not-a-jwt")).is_err());
    }

    #[test]
    fn test_project_scope() {
        let drafter = AuthContext::new(Actor::new(1, "alice", Role::Drafter), vec![3]);
        assert!(drafter.can_access_project(3));
        assert!(!drafter.can_access_project(4));
        assert!(drafter.require_project(4).is_err());

        let admin = AuthContext::new(Actor::new(9, "root", Role::Admin), vec![]);
        assert!(admin.can_access_project(4));
    }

    #[test]
    fn test_capabilities_follow_role() {
        let drafter = AuthContext::new(Actor::new(1, "alice", Role::Drafter), vec![]);
        assert!(drafter.can(Capability::Claim));
        assert!(!drafter.can(Capability::Create));
        assert_eq!(
            drafter.require(Capability::Reject).unwrap_err().status_code(),
            hyper::StatusCode::FORBIDDEN
        );
    }
}

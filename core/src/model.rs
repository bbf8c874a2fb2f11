/// Domain model for the drawing review workflow
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of a drawing, assigned by the store
pub type DrawingId = i64;
/// Identifier of the project a drawing belongs to
pub type ProjectId = i64;
/// Identifier of an authenticated actor
pub type ActorId = i64;

/// A review stage, in progression order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Waiting for (or undergoing) drafting work
    Unassigned,

    /// First quality check by a shift lead
    FirstQc,

    /// Final quality check
    FinalQc,

    /// Passed final QC; no further claims
    Approved,
}

impl Stage {
    /// All stages in progression order
    pub const ALL: [Stage; 4] = [
        Stage::Unassigned,
        Stage::FirstQc,
        Stage::FinalQc,
        Stage::Approved,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Unassigned => "unassigned",
            Stage::FirstQc => "first_qc",
            Stage::FinalQc => "final_qc",
            Stage::Approved => "approved",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| format!("unknown stage: {}", s))
    }
}

/// Role of an actor, as asserted by the credential issuer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Drafter,
    ShiftLead,
    FinalQc,
    Admin,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Drafter, Role::ShiftLead, Role::FinalQc, Role::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Drafter => "drafter",
            Role::ShiftLead => "shift_lead",
            Role::FinalQc => "final_qc",
            Role::Admin => "admin",
        }
    }

    /// Check whether this role grants a capability.
    pub fn can(self, capability: Capability) -> bool {
        ROLE_CAPABILITIES
            .iter()
            .find(|(role, _)| *role == self)
            .map(|(_, granted)| granted.contains(&capability))
            .unwrap_or(false)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| format!("unknown role: {}", s))
    }
}

/// Something an actor may be allowed to do with drawings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    View,
    Create,
    Claim,
    Submit,
    Release,
    Reject,
}

const ROLE_CAPABILITIES: &[(Role, &[Capability])] = &[
    (
        Role::Admin,
        &[
            Capability::View,
            Capability::Create,
            Capability::Claim,
            Capability::Submit,
            Capability::Release,
            Capability::Reject,
        ],
    ),
    (
        Role::Drafter,
        &[
            Capability::View,
            Capability::Claim,
            Capability::Submit,
            Capability::Release,
        ],
    ),
    (
        Role::ShiftLead,
        &[
            Capability::View,
            Capability::Claim,
            Capability::Submit,
            Capability::Release,
            Capability::Reject,
        ],
    ),
    (
        Role::FinalQc,
        &[
            Capability::View,
            Capability::Claim,
            Capability::Submit,
            Capability::Release,
            Capability::Reject,
        ],
    ),
];

/// A mutating workflow command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Claim,
    Submit,
    Release,
    Reject,
}

impl Action {
    pub const ALL: [Action; 4] = [Action::Claim, Action::Submit, Action::Release, Action::Reject];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Claim => "claim",
            Action::Submit => "submit",
            Action::Release => "release",
            Action::Reject => "reject",
        }
    }

    /// Capability a role needs to issue this command at all
    pub fn capability(&self) -> Capability {
        match self {
            Action::Claim => Capability::Claim,
            Action::Submit => Capability::Submit,
            Action::Release => Capability::Release,
            Action::Reject => Capability::Reject,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| format!("unknown action: {}", s))
    }
}

/// An authenticated actor. Also used as the resolved assignee summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: ActorId,
    pub username: String,
    pub role: Role,
}

impl Actor {
    pub fn new(id: ActorId, username: impl Into<String>, role: Role) -> Self {
        Actor {
            id,
            username: username.into(),
            role,
        }
    }
}

/// A drawing moving through the review stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Drawing {
    pub id: DrawingId,
    pub project_id: ProjectId,
    pub title: String,
    pub description: String,
    pub author_id: Option<ActorId>,
    pub current_stage: Stage,
    pub assignee_id: Option<ActorId>,
    /// Business revision; bumped on every reject
    pub revision: i64,
    /// Optimistic concurrency token; bumped on every committed mutation
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Drawing {
    /// Check if the given actor currently holds this drawing
    pub fn is_held_by(&self, actor_id: ActorId) -> bool {
        self.assignee_id == Some(actor_id)
    }
}

/// Parameters for creating a drawing at intake
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDrawing {
    pub project_id: ProjectId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author_id: Option<ActorId>,
}

/// A drawing together with its resolved assignee, as returned by listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawingView {
    #[serde(flatten)]
    pub drawing: Drawing,
    pub assignee: Option<Actor>,
}

/// One committed transition, recorded atomically with the update it describes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowLogEntry {
    pub id: Uuid,
    pub drawing_id: DrawingId,
    pub actor_id: ActorId,
    pub action: Action,
    pub from_stage: Stage,
    pub to_stage: Stage,
    pub from_version: i64,
    pub to_version: i64,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_round_trips_through_str() {
        for stage in Stage::ALL {
            assert_eq!(stage.as_str().parse::<Stage>().unwrap(), stage);
        }
        assert!("drafting".parse::<Stage>().is_err());
    }

    #[test]
    fn test_stage_serializes_snake_case() {
        let json = serde_json::to_string(&Stage::FirstQc).unwrap();
        assert_eq!(json, "\"first_qc\"");
    }

    #[test]
    fn test_role_capabilities() {
        assert!(Role::Admin.can(Capability::Create));
        assert!(!Role::Drafter.can(Capability::Create));
        assert!(!Role::Drafter.can(Capability::Reject));
        assert!(Role::ShiftLead.can(Capability::Reject));
        assert!(Role::FinalQc.can(Capability::Reject));
        for role in Role::ALL {
            assert!(role.can(Capability::View));
            assert!(role.can(Capability::Claim));
        }
    }

    #[test]
    fn test_drawing_view_flattens_drawing() {
        let now = Utc::now();
        let view = DrawingView {
            drawing: Drawing {
                id: 1,
                project_id: 3,
                title: "Pump housing".to_string(),
                description: String::new(),
                author_id: None,
                current_stage: Stage::Unassigned,
                assignee_id: Some(5),
                revision: 1,
                version: 2,
                created_at: now,
                updated_at: now,
            },
            assignee: Some(Actor::new(5, "alice", Role::Drafter)),
        };

        let value = serde_json::to_value(&view).unwrap();
        assert_eq!(value["current_stage"], "unassigned");
        assert_eq!(value["assignee"]["username"], "alice");
        assert_eq!(value["assignee_id"], 5);
    }
}

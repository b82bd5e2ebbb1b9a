//! # Records
//!
//! Acts, decorations and per-user progress as they are persisted and served.
//!
//! ## Ownership
//! - An act may have no owner (anonymous submission).
//! - A decoration always belongs to exactly one user.
//! - A decoration may outlive the act that unlocked it, the reference is cleared instead.
use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type UserId = u64;
pub type ActId = Uuid;
pub type DecorationId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Food,
    Clothing,
    Time,
    Money,
    Other,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Food,
        Category::Clothing,
        Category::Time,
        Category::Money,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Food => "food",
            Category::Clothing => "clothing",
            Category::Time => "time",
            Category::Money => "money",
            Category::Other => "other",
        }
    }
}

impl FromStr for Category {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|category| category.as_str() == s)
            .ok_or(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Act {
    pub id: ActId,
    pub user: Option<UserId>,
    pub description: String,
    pub category: Category,
    pub latitude: f64,
    pub longitude: f64,
    pub city: String,
    pub country: String,
    pub evidence_url: Option<String>,
    pub submitted_by: String,
    pub is_anonymous: bool,
    pub appreciation_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Submission payload, validated by [`crate::acts::ActService::create_act`].
#[derive(Debug, Clone, Deserialize)]
pub struct NewAct {
    pub description: String,
    pub category: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub evidence_url: Option<String>,
    #[serde(default)]
    pub submitted_by: String,
    #[serde(default = "default_anonymous")]
    pub is_anonymous: bool,
}

fn default_anonymous() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecorationType {
    Ornament,
    Star,
    Light,
    Garland,
    Gift,
    Snowflake,
}

impl DecorationType {
    pub const ALL: [DecorationType; 6] = [
        DecorationType::Ornament,
        DecorationType::Star,
        DecorationType::Light,
        DecorationType::Garland,
        DecorationType::Gift,
        DecorationType::Snowflake,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DecorationType::Ornament => "ornament",
            DecorationType::Star => "star",
            DecorationType::Light => "light",
            DecorationType::Garland => "garland",
            DecorationType::Gift => "gift",
            DecorationType::Snowflake => "snowflake",
        }
    }

    /// Colors a decoration of this type may be painted with.
    pub fn palette(&self) -> &'static [&'static str] {
        match self {
            DecorationType::Ornament => &["#DC2626", "#16A34A", "#D97706", "#2563EB", "#9333EA"],
            DecorationType::Star => &["#FBBF24", "#FCD34D"],
            DecorationType::Light => &["#FEF3C7", "#FDE68A"],
            DecorationType::Garland => &["#16A34A", "#15803D"],
            DecorationType::Gift => &["#DC2626", "#2563EB", "#16A34A"],
            DecorationType::Snowflake => &["#E0E7FF", "#DBEAFE"],
        }
    }
}

impl fmt::Display for DecorationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DecorationType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DecorationType::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decoration {
    pub id: DecorationId,
    pub user: UserId,
    pub decoration_type: DecorationType,
    pub position_x: f64,
    pub position_y: f64,
    pub color: String,
    pub size: f64,
    pub is_auto_placed: bool,
    pub unlocked_by_act: Option<ActId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Type, color, size and position chosen for a decoration before it is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    pub decoration_type: DecorationType,
    pub color: String,
    pub size: f64,
    pub position_x: f64,
    pub position_y: f64,
}

impl Decoration {
    pub fn auto_placed(user: UserId, act: ActId, placement: Placement, now: DateTime<Utc>) -> Self {
        Self::from_placement(user, Some(act), placement, now)
    }

    pub fn manual(user: UserId, placement: Placement, now: DateTime<Utc>) -> Self {
        Self::from_placement(user, None, placement, now)
    }

    fn from_placement(
        user: UserId,
        act: Option<ActId>,
        placement: Placement,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user,
            decoration_type: placement.decoration_type,
            position_x: placement.position_x,
            position_y: placement.position_y,
            color: placement.color,
            size: placement.size,
            is_auto_placed: act.is_some(),
            unlocked_by_act: act,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Manual decoration payload. Type is kept as text so unknown names surface as a field error.
#[derive(Debug, Clone, Deserialize)]
pub struct NewDecoration {
    pub decoration_type: String,
    pub position_x: f64,
    pub position_y: f64,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub size: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DecorationPatch {
    pub decoration_type: Option<String>,
    pub position_x: Option<f64>,
    pub position_y: Option<f64>,
    pub color: Option<String>,
    pub size: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub user: UserId,
    pub total_acts: u64,
    pub total_decorations: u64,
    pub tier_level: u8,
    pub last_updated: DateTime<Utc>,
}

impl Progress {
    pub fn new(user: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user,
            total_acts: 0,
            total_decorations: 0,
            tier_level: 1,
            last_updated: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Milestone {
    pub acts_needed: u64,
    pub milestone_acts: u64,
    pub reward: &'static str,
}

/// Progress as returned to clients, with the next milestone resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressView {
    pub total_acts: u64,
    pub total_decorations: u64,
    pub tier_level: u8,
    pub next_milestone: Option<Milestone>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreeState {
    pub tier_level: u8,
    pub total_acts: u64,
    pub total_decorations: u64,
    pub decorations: Vec<Decoration>,
    pub progress: ProgressView,
}

//! # Acts
//!
//! Submission, browsing and aggregate views over the kindness feed.
//!
//! ## Filters
//! - category: exact match
//! - city: case-insensitive substring
//! - start_date/end_date: whole UTC days, both inclusive
//! - search: case-insensitive substring over description, city, country and submitter
//! - min_lat/max_lat/min_lng/max_lng: bounding box, any side may be left open
//!
//! ## Regions
//! A region is either a city substring or a box of half a degree around a coordinate.
use std::{collections::BTreeMap, sync::Arc};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::{
    database::SharedStore,
    error::AppError,
    models::{Act, ActId, Category, NewAct, UserId},
    tree::TreeService,
    utils::validate_coordinates,
};

const REGION_RADIUS_DEGREES: f64 = 0.5;
const RECENT_ACTS: usize = 10;
const UNKNOWN_CITY: &str = "Unknown";

#[derive(Debug, Default, Clone, Deserialize)]
pub struct ActQuery {
    pub category: Option<String>,
    pub city: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub search: Option<String>,
    pub ordering: Option<String>,
    pub min_lat: Option<f64>,
    pub max_lat: Option<f64>,
    pub min_lng: Option<f64>,
    pub max_lng: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ordering {
    CreatedAt,
    CreatedAtDesc,
    Appreciation,
    AppreciationDesc,
}

impl Ordering {
    fn parse(value: Option<&str>) -> Result<Self, AppError> {
        match value.unwrap_or("-created_at") {
            "created_at" => Ok(Ordering::CreatedAt),
            "-created_at" => Ok(Ordering::CreatedAtDesc),
            "appreciation_count" => Ok(Ordering::Appreciation),
            "-appreciation_count" => Ok(Ordering::AppreciationDesc),
            other => Err(AppError::invalid("ordering", format!("cannot order by '{other}'"))),
        }
    }

    fn sort(self, acts: &mut [Act]) {
        match self {
            Ordering::CreatedAt => acts.sort_by_key(|act| act.created_at),
            Ordering::CreatedAtDesc => acts.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
            Ordering::Appreciation => acts.sort_by_key(|act| act.appreciation_count),
            Ordering::AppreciationDesc => {
                acts.sort_by(|a, b| b.appreciation_count.cmp(&a.appreciation_count))
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegionQuery {
    pub city: Option<String>,
    pub lat: Option<String>,
    pub lng: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopRegion {
    pub city: Option<String>,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stats {
    pub total_acts: u64,
    pub acts_today: u64,
    pub active_regions: u64,
    pub top_region: TopRegion,
    pub category_breakdown: BTreeMap<&'static str, u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionSummary {
    pub city: String,
    pub total_acts: u64,
    pub acts_this_week: u64,
    pub recent_acts: Vec<Act>,
    pub category_breakdown: BTreeMap<&'static str, u64>,
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn category_breakdown<'a>(acts: impl IntoIterator<Item = &'a Act>) -> BTreeMap<&'static str, u64> {
    let mut breakdown = BTreeMap::new();
    for act in acts {
        *breakdown.entry(act.category.as_str()).or_insert(0) += 1;
    }

    breakdown
}

fn parse_category(value: &str) -> Result<Category, AppError> {
    value.parse().map_err(|_| {
        let allowed: Vec<&str> = Category::ALL.iter().map(Category::as_str).collect();
        AppError::invalid("category", format!("must be one of: {}", allowed.join(", ")))
    })
}

fn parse_coordinate(field: &'static str, value: &str) -> Result<f64, AppError> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| AppError::invalid(field, format!("'{value}' is not a number")))
}

struct Filter {
    category: Option<Category>,
    city: Option<String>,
    from: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
    search: Option<String>,
    lat: (f64, f64),
    lng: (f64, f64),
}

impl Filter {
    fn from_query(query: &ActQuery) -> Result<Self, AppError> {
        let category = query.category.as_deref().map(parse_category).transpose()?;

        Ok(Self {
            category,
            city: query.city.clone().filter(|c| !c.is_empty()),
            from: query.start_date.map(|d| d.and_time(chrono::NaiveTime::MIN).and_utc()),
            until: query
                .end_date
                .and_then(|d| d.succ_opt())
                .map(|d| d.and_time(chrono::NaiveTime::MIN).and_utc()),
            search: query.search.clone().filter(|s| !s.is_empty()),
            lat: (
                query.min_lat.unwrap_or(f64::NEG_INFINITY),
                query.max_lat.unwrap_or(f64::INFINITY),
            ),
            lng: (
                query.min_lng.unwrap_or(f64::NEG_INFINITY),
                query.max_lng.unwrap_or(f64::INFINITY),
            ),
        })
    }

    fn matches(&self, act: &Act) -> bool {
        if self.category.is_some_and(|c| c != act.category) {
            return false;
        }
        if let Some(city) = &self.city {
            if !contains_ignore_case(&act.city, city) {
                return false;
            }
        }
        if self.from.is_some_and(|from| act.created_at < from) {
            return false;
        }
        if self.until.is_some_and(|until| act.created_at >= until) {
            return false;
        }
        if let Some(search) = &self.search {
            let hit = [&act.description, &act.city, &act.country, &act.submitted_by]
                .iter()
                .any(|field| contains_ignore_case(field, search));
            if !hit {
                return false;
            }
        }

        (self.lat.0..=self.lat.1).contains(&act.latitude)
            && (self.lng.0..=self.lng.1).contains(&act.longitude)
    }
}

pub struct ActService {
    store: SharedStore,
    tree: Arc<TreeService>,
}

impl ActService {
    pub fn new(store: SharedStore, tree: Arc<TreeService>) -> Self {
        Self { store, tree }
    }

    /// Stores the act and, for owned acts, immediately decorates the owner's tree.
    pub async fn create_act(&self, owner: Option<UserId>, input: NewAct) -> Result<Act, AppError> {
        let description = input.description.trim().to_string();
        if description.is_empty() {
            return Err(AppError::invalid("description", "must not be empty"));
        }
        let category = parse_category(&input.category)?;
        validate_coordinates(input.latitude, input.longitude)?;

        let now = Utc::now();
        let act = Act {
            id: Uuid::new_v4(),
            user: owner,
            description,
            category,
            latitude: input.latitude,
            longitude: input.longitude,
            city: input.city.trim().to_string(),
            country: input.country.trim().to_string(),
            evidence_url: input.evidence_url.filter(|url| !url.trim().is_empty()),
            submitted_by: input.submitted_by.trim().to_string(),
            is_anonymous: input.is_anonymous,
            appreciation_count: 0,
            created_at: now,
            updated_at: now,
        };

        self.store.insert_act(act.clone()).await?;
        info!(
            act = %act.id,
            category = act.category.as_str(),
            owned = owner.is_some(),
            "Act submitted"
        );

        if let Some(user) = owner {
            self.tree.sync(user).await?;
        }

        Ok(act)
    }

    pub async fn get_act(&self, id: ActId) -> Result<Act, AppError> {
        self.store.get_act(id).await?.ok_or(AppError::NotFound("Act"))
    }

    pub async fn list_acts(&self, query: &ActQuery) -> Result<Vec<Act>, AppError> {
        let filter = Filter::from_query(query)?;
        let ordering = Ordering::parse(query.ordering.as_deref())?;

        let mut acts: Vec<Act> = self
            .store
            .list_acts()
            .await?
            .into_iter()
            .filter(|act| filter.matches(act))
            .collect();
        ordering.sort(&mut acts);

        Ok(acts)
    }

    /// Owned acts may only be removed by their owner. Decorations they unlocked are kept.
    pub async fn delete_act(&self, requester: Option<UserId>, id: ActId) -> Result<(), AppError> {
        let act = self.get_act(id).await?;
        if act.user.is_some() && act.user != requester {
            return Err(AppError::NotFound("Act"));
        }

        let unlinked = self.tree.forget_act(act.user, id).await?;

        info!(act = %id, unlinked, "Act deleted");

        Ok(())
    }

    pub async fn stats(&self, now: DateTime<Utc>) -> Result<Stats, AppError> {
        let acts = self.store.list_acts().await?;
        let today = now.date_naive();

        let mut cities: BTreeMap<&str, u64> = BTreeMap::new();
        for act in acts.iter().filter(|act| !act.city.is_empty()) {
            *cities.entry(act.city.as_str()).or_insert(0) += 1;
        }

        // ties go to the alphabetically first city
        let top_region = cities
            .iter()
            .fold(None, |best: Option<(&str, u64)>, (&city, &count)| match best {
                Some((_, best_count)) if best_count >= count => best,
                _ => Some((city, count)),
            })
            .map_or(TopRegion { city: None, count: 0 }, |(city, count)| TopRegion {
                city: Some(city.to_string()),
                count,
            });

        Ok(Stats {
            total_acts: acts.len() as u64,
            acts_today: acts
                .iter()
                .filter(|act| act.created_at.date_naive() == today)
                .count() as u64,
            active_regions: cities.len() as u64,
            top_region,
            category_breakdown: category_breakdown(&acts),
        })
    }

    pub async fn region(
        &self,
        query: &RegionQuery,
        now: DateTime<Utc>,
    ) -> Result<RegionSummary, AppError> {
        let city = query.city.as_deref().filter(|c| !c.is_empty());

        let filter = match (city, query.lat.as_deref(), query.lng.as_deref()) {
            (Some(city), _, _) => ActQuery {
                city: Some(city.to_string()),
                ..ActQuery::default()
            },
            (None, Some(lat), Some(lng)) => {
                let lat = parse_coordinate("lat", lat)?;
                let lng = parse_coordinate("lng", lng)?;

                ActQuery {
                    min_lat: Some(lat - REGION_RADIUS_DEGREES),
                    max_lat: Some(lat + REGION_RADIUS_DEGREES),
                    min_lng: Some(lng - REGION_RADIUS_DEGREES),
                    max_lng: Some(lng + REGION_RADIUS_DEGREES),
                    ..ActQuery::default()
                }
            }
            _ => {
                return Err(AppError::invalid(
                    "city",
                    "provide either city or lat/lng parameters",
                ));
            }
        };

        let acts = self.list_acts(&filter).await?;
        let week_ago = now - Duration::days(7);

        // the requested city only names a region with no acts in it
        let region_city = match acts.first() {
            Some(act) if !act.city.is_empty() => act.city.clone(),
            Some(_) => UNKNOWN_CITY.to_string(),
            None => city.unwrap_or(UNKNOWN_CITY).to_string(),
        };

        Ok(RegionSummary {
            city: region_city,
            total_acts: acts.len() as u64,
            acts_this_week: acts.iter().filter(|act| act.created_at >= week_ago).count() as u64,
            category_breakdown: category_breakdown(&acts),
            recent_acts: acts.into_iter().take(RECENT_ACTS).collect(),
        })
    }
}

//! Full-list refresh of small reference datasets.
//!
//! Each item is looked up by its remote id and updated in place, or inserted.
//! Concurrent refreshes race on insert; the loser logs and moves on.

use crate::models::IdParseError;
use crate::store::{RefType, SkillDefinition, SkillGroup, Station, SyncDb};
use crate::sync::models::RefreshSummary;
use crate::sync::traits::ReferenceApi;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReferenceDataset {
    ConquerableStations,
    RefTypes,
    SkillTree,
}

impl ReferenceDataset {
    pub const ALL: [ReferenceDataset; 3] = [
        ReferenceDataset::ConquerableStations,
        ReferenceDataset::RefTypes,
        ReferenceDataset::SkillTree,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceDataset::ConquerableStations => "conquerable_stations",
            ReferenceDataset::RefTypes => "ref_types",
            ReferenceDataset::SkillTree => "skill_tree",
        }
    }
}

impl fmt::Display for ReferenceDataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReferenceDataset {
    type Err = IdParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase().replace('-', "_");
        ReferenceDataset::ALL
            .into_iter()
            .find(|d| d.as_str() == needle)
            .ok_or_else(|| IdParseError::UnknownStream(s.to_string()))
    }
}

pub struct ReferenceRefresher {
    db: Arc<dyn SyncDb>,
    api: Arc<dyn ReferenceApi>,
}

impl ReferenceRefresher {
    pub fn new(db: Arc<dyn SyncDb>, api: Arc<dyn ReferenceApi>) -> Self {
        Self { db, api }
    }

    pub async fn refresh(&self, dataset: ReferenceDataset) -> Result<RefreshSummary> {
        match dataset {
            ReferenceDataset::ConquerableStations => self.refresh_stations().await,
            ReferenceDataset::RefTypes => self.refresh_ref_types().await,
            ReferenceDataset::SkillTree => self.refresh_skill_tree().await,
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn refresh_stations(&self) -> Result<RefreshSummary> {
        let page = self.api.conquerable_stations().await?;
        let mut summary = RefreshSummary::default();

        for outpost in &page.records {
            if let Some(mut station) = self.db.get_station(outpost.station_id).await? {
                station.name = outpost.station_name.clone();
                self.db.update_station(&station).await?;
                summary.updated += 1;
                continue;
            }

            let Some(system) = self.db.get_solar_system(outpost.solar_system_id).await? else {
                tracing::warn!(
                    station_id = outpost.station_id,
                    solar_system_id = outpost.solar_system_id,
                    "station is in an unknown solar system; skipping"
                );
                summary.skipped += 1;
                continue;
            };

            let station = Station {
                id: outpost.station_id,
                name: outpost.station_name.clone(),
                solar_system_id: system.id,
                type_id: outpost.station_type_id,
                constellation_id: system.constellation_id,
                region_id: system.region_id,
            };
            match self.db.insert_station(&station).await {
                Ok(()) => summary.created += 1,
                Err(Error::Conflict(_)) => {
                    tracing::warn!(
                        station_id = outpost.station_id,
                        "station was already processed by a concurrently running worker"
                    );
                    summary.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(
            count = page.records.len(),
            created = summary.created,
            updated = summary.updated,
            "updated conquerable stations"
        );
        Ok(summary)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn refresh_ref_types(&self) -> Result<RefreshSummary> {
        let page = self.api.ref_types().await?;
        let mut summary = RefreshSummary::default();

        for remote in &page.records {
            let ref_type = RefType {
                id: remote.ref_type_id,
                name: remote.ref_type_name.clone(),
            };
            if self.db.get_ref_type(ref_type.id).await?.is_some() {
                self.db.update_ref_type(&ref_type).await?;
                summary.updated += 1;
                continue;
            }
            match self.db.insert_ref_type(&ref_type).await {
                Ok(()) => summary.created += 1,
                Err(Error::Conflict(_)) => {
                    tracing::warn!(
                        ref_type_id = ref_type.id,
                        "ref type was already processed by a concurrently running worker"
                    );
                    summary.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(count = page.records.len(), "updated reference types");
        Ok(summary)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn refresh_skill_tree(&self) -> Result<RefreshSummary> {
        let page = self.api.skill_tree().await?;
        let mut summary = RefreshSummary::default();

        for group in &page.records {
            self.db
                .upsert_skill_group(&SkillGroup {
                    id: group.group_id,
                    name: group.name.clone(),
                })
                .await?;

            for skill in &group.skills {
                let known = self.db.get_skill_definition(skill.type_id).await?.is_some();
                self.db
                    .upsert_skill_definition(&SkillDefinition {
                        type_id: skill.type_id,
                        group_id: group.group_id,
                        name: skill.name.clone(),
                        published: skill.published,
                        description: skill.description.clone(),
                        rank: skill.rank,
                        primary_attribute: skill.primary_attribute.clone(),
                        secondary_attribute: skill.secondary_attribute.clone(),
                    })
                    .await?;
                if known {
                    summary.updated += 1;
                } else {
                    summary.created += 1;
                }
            }
        }

        tracing::info!(
            groups = page.records.len(),
            skills = summary.total(),
            "updated skill tree"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use crate::store::ReferenceStore;
    use crate::sync::models::{ConquerableStation, Page, RemoteRefType, RemoteSkill, RemoteSkillGroup};
    use crate::sync::test_support::{
        JITA, JITA_STATION, ScriptedGateway, StaleReads, cache_time, seeded_db,
    };

    fn outpost(station_id: i64, name: &str, solar_system_id: i64) -> ConquerableStation {
        ConquerableStation {
            station_id,
            station_name: name.to_string(),
            station_type_id: 21646,
            solar_system_id,
        }
    }

    #[tokio::test]
    async fn stations_update_insert_and_skip_unknown_systems() {
        let db = seeded_db().await;
        let api = Arc::new(ScriptedGateway::new());
        api.push_stations(Ok(Page::new(
            vec![
                outpost(JITA_STATION, "Renamed Plant", JITA),
                outpost(61000001, "New Outpost", JITA),
                outpost(61000002, "Nowhere", 1),
            ],
            cache_time(1),
        )));

        let refresher = ReferenceRefresher::new(db.clone(), api);
        let summary = refresher.refresh_stations().await.unwrap();
        assert_eq!(
            summary,
            RefreshSummary {
                created: 1,
                updated: 1,
                skipped: 1
            }
        );

        let created = db.get_station(61000001).await.unwrap().unwrap();
        assert_eq!(created.region_id, 10000002);
        assert_eq!(created.constellation_id, 20000020);
        assert_eq!(
            db.get_station(JITA_STATION).await.unwrap().unwrap().name,
            "Renamed Plant"
        );
    }

    #[tokio::test]
    async fn duplicate_outposts_in_one_listing_are_tolerated() {
        let db = seeded_db().await;
        let api = Arc::new(ScriptedGateway::new());
        api.push_stations(Ok(Page::new(
            vec![outpost(61000001, "Twice", JITA), outpost(61000001, "Twice", JITA)],
            cache_time(1),
        )));

        let summary = ReferenceRefresher::new(db.clone(), api)
            .refresh_stations()
            .await
            .unwrap();
        // The second copy is found by lookup and updated in place.
        assert_eq!(summary.created, 1);
        assert_eq!(summary.updated, 1);
    }

    #[tokio::test]
    async fn concurrently_inserted_station_is_skipped() {
        let inner = seeded_db().await;
        let api = Arc::new(ScriptedGateway::new());
        api.push_stations(Ok(Page::new(
            vec![outpost(JITA_STATION, "Renamed Plant", JITA)],
            cache_time(1),
        )));

        let summary = ReferenceRefresher::new(Arc::new(StaleReads::new(inner.clone())), api)
            .refresh_stations()
            .await
            .unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.created, 0);
        assert_ne!(
            inner.get_station(JITA_STATION).await.unwrap().unwrap().name,
            "Renamed Plant"
        );
    }

    #[tokio::test]
    async fn ref_types_upsert_names() {
        let db = seeded_db().await;
        let api = Arc::new(ScriptedGateway::new());
        let listing = |name: &str| {
            Ok(Page::new(
                vec![RemoteRefType {
                    ref_type_id: 2,
                    ref_type_name: name.to_string(),
                }],
                cache_time(1),
            ))
        };
        api.push_ref_types(listing("Market Transaction"));
        api.push_ref_types(listing("Market Escrow"));

        let refresher = ReferenceRefresher::new(db.clone(), api);
        assert_eq!(refresher.refresh_ref_types().await.unwrap().created, 1);
        assert_eq!(refresher.refresh_ref_types().await.unwrap().updated, 1);
        assert_eq!(
            db.get_ref_type(2).await.unwrap().unwrap().name,
            "Market Escrow"
        );
    }

    #[tokio::test]
    async fn skill_tree_keeps_optional_attributes() {
        let db = seeded_db().await;
        let api = Arc::new(ScriptedGateway::new());
        api.push_skill_tree(Ok(Page::new(
            vec![RemoteSkillGroup {
                group_id: 255,
                name: "Gunnery".to_string(),
                skills: vec![RemoteSkill {
                    type_id: 3300,
                    name: "Gunnery".to_string(),
                    published: true,
                    description: "Basic turret operation skill.".to_string(),
                    rank: 1,
                    primary_attribute: Some("perception".to_string()),
                    secondary_attribute: None,
                }],
            }],
            cache_time(1),
        )));

        let summary = ReferenceRefresher::new(db.clone(), api)
            .refresh(ReferenceDataset::SkillTree)
            .await
            .unwrap();
        assert_eq!(summary.created, 1);
        let skill = db.get_skill_definition(3300).await.unwrap().unwrap();
        assert_eq!(skill.group_id, 255);
        assert_eq!(skill.secondary_attribute, None);
    }

    #[tokio::test]
    async fn gateway_failure_propagates() {
        let db = seeded_db().await;
        let api = Arc::new(ScriptedGateway::new());
        api.push_ref_types(Err(GatewayError::transient("timeout")));
        let err = ReferenceRefresher::new(db, api)
            .refresh_ref_types()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Gateway(GatewayError::Transient(_))));
    }

    #[test]
    fn datasets_parse_from_cli_names() {
        assert_eq!(
            "skill-tree".parse::<ReferenceDataset>().unwrap(),
            ReferenceDataset::SkillTree
        );
        assert!("orders".parse::<ReferenceDataset>().is_err());
    }
}

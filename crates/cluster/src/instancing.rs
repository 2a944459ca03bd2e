// Copyright (C) 2025 AmbonMUD contributors. This program is free software:
// you can redistribute it and/or modify it under the terms of the GNU General
// Public License as published by the Free Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Zone instancing: choosing which instance receives an entering player,
//! and the advisory threshold scaler. Scaling decisions are published for
//! an external operator; the engine never spawns or kills processes.

use crate::registry::ZoneInstance;
use ambonmud_common::ids::{EngineId, ZoneId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Instance selection priority: group hint, then sticky hint, then
/// least-loaded under capacity, then least-loaded overall.
pub fn select_instance<'a>(
    instances: &'a [ZoneInstance],
    group_hint: Option<&EngineId>,
    sticky_hint: Option<&EngineId>,
) -> Option<&'a ZoneInstance> {
    if instances.is_empty() {
        return None;
    }
    if let Some(group) = group_hint {
        if let Some(instance) = instances.iter().find(|i| &i.engine_id == group) {
            return Some(instance);
        }
    }
    if let Some(sticky) = sticky_hint {
        if let Some(instance) = instances.iter().find(|i| &i.engine_id == sticky) {
            return Some(instance);
        }
    }
    instances
        .iter()
        .filter(|i| i.player_count < i.capacity)
        .min_by_key(|i| i.player_count)
        .or_else(|| instances.iter().min_by_key(|i| i.player_count))
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleAction {
    Up,
    Down,
}

/// Advisory decision published to the scaling channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScaleDecision {
    pub zone: ZoneId,
    pub action: ScaleAction,
    pub instance_count: usize,
    pub utilization: f64,
}

pub struct ThresholdScaler {
    scale_up_threshold: f64,
    scale_down_threshold: f64,
    min_instances: usize,
    cooldown_ms: u64,
    last_decision_ms: HashMap<ZoneId, u64>,
}

impl ThresholdScaler {
    pub fn new(
        scale_up_threshold: f64,
        scale_down_threshold: f64,
        min_instances: usize,
        cooldown_ms: u64,
    ) -> Self {
        Self {
            scale_up_threshold,
            scale_down_threshold,
            min_instances,
            cooldown_ms,
            last_decision_ms: HashMap::new(),
        }
    }

    /// Evaluates one zone's instances. Returns a decision at most once per
    /// cooldown window per zone.
    pub fn evaluate(
        &mut self,
        zone: &ZoneId,
        instances: &[ZoneInstance],
        now_ms: u64,
    ) -> Option<ScaleDecision> {
        if instances.is_empty() {
            return None;
        }
        if let Some(last) = self.last_decision_ms.get(zone) {
            if now_ms.saturating_sub(*last) < self.cooldown_ms {
                return None;
            }
        }

        let players: usize = instances.iter().map(|i| i.player_count).sum();
        let capacity: usize = instances.iter().map(|i| i.capacity).sum();
        if capacity == 0 {
            return None;
        }
        let utilization = players as f64 / capacity as f64;

        let action = if utilization >= self.scale_up_threshold {
            Some(ScaleAction::Up)
        } else if utilization <= self.scale_down_threshold && instances.len() > self.min_instances
        {
            Some(ScaleAction::Down)
        } else {
            None
        };

        action.map(|action| {
            self.last_decision_ms.insert(zone.clone(), now_ms);
            ScaleDecision {
                zone: zone.clone(),
                action,
                instance_count: instances.len(),
                utilization,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ambonmud_common::model::EngineAddress;
    use pretty_assertions::assert_eq;

    fn instance(engine: &str, players: usize, capacity: usize) -> ZoneInstance {
        ZoneInstance {
            engine_id: EngineId::from(engine),
            address: EngineAddress {
                engine_id: EngineId::from(engine),
                host: "10.0.0.1".into(),
                port: 4000,
            },
            zone: ZoneId::from("arena"),
            player_count: players,
            capacity,
        }
    }

    #[test]
    fn group_hint_wins_over_load() {
        let instances = vec![instance("a", 49, 50), instance("b", 1, 50)];
        let chosen = select_instance(&instances, Some(&EngineId::from("a")), None).unwrap();
        assert_eq!(chosen.engine_id, EngineId::from("a"));
    }

    #[test]
    fn sticky_hint_applies_without_group() {
        let instances = vec![instance("a", 10, 50), instance("b", 1, 50)];
        let chosen =
            select_instance(&instances, None, Some(&EngineId::from("a"))).unwrap();
        assert_eq!(chosen.engine_id, EngineId::from("a"));
    }

    #[test]
    fn least_loaded_under_capacity_preferred() {
        let instances = vec![
            instance("full", 50, 50),
            instance("busy", 30, 50),
            instance("quiet", 10, 50),
        ];
        let chosen = select_instance(&instances, None, None).unwrap();
        assert_eq!(chosen.engine_id, EngineId::from("quiet"));
    }

    #[test]
    fn all_full_falls_back_to_least_loaded() {
        let instances = vec![instance("a", 60, 50), instance("b", 55, 50)];
        let chosen = select_instance(&instances, None, None).unwrap();
        assert_eq!(chosen.engine_id, EngineId::from("b"));
    }

    #[test]
    fn scaler_thresholds_and_cooldown() {
        let zone = ZoneId::from("arena");
        let mut scaler = ThresholdScaler::new(0.8, 0.3, 1, 10_000);

        // 90/100 used: scale up.
        let hot = vec![instance("a", 45, 50), instance("b", 45, 50)];
        let decision = scaler.evaluate(&zone, &hot, 1_000).unwrap();
        assert_eq!(decision.action, ScaleAction::Up);

        // Within cooldown: silent.
        assert_eq!(scaler.evaluate(&zone, &hot, 5_000), None);

        // After cooldown, cold zone with two instances: scale down.
        let cold = vec![instance("a", 5, 50), instance("b", 5, 50)];
        let decision = scaler.evaluate(&zone, &cold, 20_000).unwrap();
        assert_eq!(decision.action, ScaleAction::Down);
    }

    #[test]
    fn scaler_honors_min_instances() {
        let zone = ZoneId::from("arena");
        let mut scaler = ThresholdScaler::new(0.8, 0.3, 1, 0);
        let single = vec![instance("a", 0, 50)];
        assert_eq!(scaler.evaluate(&zone, &single, 0), None);
    }
}

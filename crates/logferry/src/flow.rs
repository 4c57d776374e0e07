// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Flow control between pipeline stages.
//!
//! Every edge of a route is a [`FlowLink`] from a producer to the module
//! directly downstream of it. A producer may send only while every one of its
//! links admits the consumer's current queue occupancy. Once a producer has
//! been refused, its [`FlowGate`] only reopens after occupancy falls below the
//! resume level (`high_water_mark * resume_multiplier`), so a consumer hovering
//! around the high-water mark does not make the producer flap.

use serde::Deserialize;

use crate::constants::DEFAULT_RESUME_MULTIPLIER;
use crate::module::ModuleId;

/// Flow-control settings of one route.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct FlowControl {
    /// When disabled, downstream queues are never considered full.
    pub enabled: bool,
    /// Occupancy (records) at which downstream stops accepting. Defaults to
    /// the downstream module's queue size.
    pub high_water_mark: Option<usize>,
    /// Fraction of the high-water mark below which a blocked producer resumes.
    pub resume_multiplier: f64,
}

impl Default for FlowControl {
    fn default() -> Self {
        Self {
            enabled: true,
            high_water_mark: None,
            resume_multiplier: DEFAULT_RESUME_MULTIPLIER,
        }
    }
}

/// Resolved flow-control edge towards a downstream module.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowLink {
    pub to: ModuleId,
    pub enabled: bool,
    pub high_water_mark: usize,
    pub resume_multiplier: f64,
}

impl FlowLink {
    #[must_use]
    pub fn new(to: ModuleId, control: &FlowControl, queue_size: usize) -> Self {
        Self {
            to,
            enabled: control.enabled,
            high_water_mark: control.high_water_mark.unwrap_or(queue_size),
            resume_multiplier: control.resume_multiplier,
        }
    }

    /// True when a consumer holding `occupancy` records accepts more, with the
    /// high-water mark scaled by `multiplier`.
    #[must_use]
    pub fn admits(&self, occupancy: usize, multiplier: f64) -> bool {
        !self.enabled || (occupancy as f64) < (self.high_water_mark as f64) * multiplier
    }

    /// Occupancy below which a blocked producer may send again.
    #[must_use]
    pub fn resume_level(&self) -> f64 {
        self.high_water_mark as f64 * self.resume_multiplier
    }
}

/// `can_send` over a set of links paired with their consumers' occupancy.
#[must_use]
pub fn can_send<'a>(
    links: impl IntoIterator<Item = (&'a FlowLink, usize)>,
    multiplier: f64,
) -> bool {
    links
        .into_iter()
        .all(|(link, occupancy)| link.admits(occupancy, multiplier))
}

/// Hysteresis state of one producer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlowGate {
    blocked: bool,
}

impl FlowGate {
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    /// Decides whether the producer may send now and records the outcome.
    pub fn evaluate<'a>(&mut self, links: impl IntoIterator<Item = (&'a FlowLink, usize)>) -> bool {
        let blocked = self.blocked;
        let open = links.into_iter().all(|(link, occupancy)| {
            let multiplier = if blocked { link.resume_multiplier } else { 1.0 };
            link.admits(occupancy, multiplier)
        });
        self.blocked = !open;
        open
    }

    /// Like [`FlowGate::evaluate`] without recording the outcome.
    #[must_use]
    pub fn would_open<'a>(&self, links: impl IntoIterator<Item = (&'a FlowLink, usize)>) -> bool {
        let mut trial = *self;
        trial.evaluate(links)
    }
}

// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Routes connect modules into pipelines.
//!
//! A route is an ordered path `input [processor ...] output`. Several routes
//! may share modules; a module forwards to every module that directly follows
//! it on any route.

use std::collections::HashMap;

use serde::Deserialize;

use crate::errors::BuildError;
use crate::flow::FlowControl;
use crate::module::{ModuleId, ModuleKind};

/// Route as written in configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RouteSpec {
    pub name: String,
    pub path: Vec<String>,
    /// Larger values are dispatched first when events are due at the same time.
    #[serde(default)]
    pub priority: u32,
    #[serde(default)]
    pub flow_control: FlowControl,
}

impl RouteSpec {
    #[must_use]
    pub fn new(name: impl Into<String>, path: &[&str]) -> Self {
        Self {
            name: name.into(),
            path: path.iter().map(|module| (*module).to_string()).collect(),
            priority: 0,
            flow_control: FlowControl::default(),
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_flow_control(mut self, flow_control: FlowControl) -> Self {
        self.flow_control = flow_control;
        self
    }
}

/// Route with module names resolved to ids.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub name: String,
    pub modules: Vec<ModuleId>,
    pub priority: u32,
    pub flow: FlowControl,
}

impl Route {
    /// Resolves `spec` against the registered modules and checks its shape.
    pub(crate) fn resolve(
        spec: &RouteSpec,
        names: &HashMap<String, ModuleId>,
        kinds: &[ModuleKind],
    ) -> Result<Self, BuildError> {
        if spec.path.is_empty() {
            return Err(BuildError::EmptyRoute(spec.name.clone()));
        }
        let invalid = |reason: String| BuildError::InvalidRoute {
            route: spec.name.clone(),
            reason,
        };

        let mut modules = Vec::with_capacity(spec.path.len());
        for name in &spec.path {
            let id = names
                .get(name)
                .copied()
                .ok_or_else(|| BuildError::UnknownModule {
                    route: spec.name.clone(),
                    module: name.clone(),
                })?;
            if modules.contains(&id) {
                return Err(invalid(format!("module '{name}' appears twice")));
            }
            modules.push(id);
        }

        let last = modules.len() - 1;
        for (position, (id, name)) in modules.iter().zip(&spec.path).enumerate() {
            let kind = kinds[id.index()];
            let expected = match position {
                0 => ModuleKind::Input,
                p if p == last => ModuleKind::Output,
                _ => ModuleKind::Processor,
            };
            if kind != expected {
                return Err(invalid(format!(
                    "module '{name}' is an {kind} but position {position} requires an {expected}"
                )));
            }
        }
        if modules.len() < 2 {
            return Err(invalid("a route needs an input and an output".to_string()));
        }

        let multiplier = spec.flow_control.resume_multiplier;
        if !(multiplier > 0.0 && multiplier <= 1.0) {
            return Err(invalid(format!(
                "resume_multiplier {} is outside (0, 1]",
                spec.flow_control.resume_multiplier
            )));
        }

        Ok(Self {
            name: spec.name.clone(),
            modules,
            priority: spec.priority,
            flow: spec.flow_control,
        })
    }

    /// Consecutive `(producer, consumer)` pairs along the route.
    pub fn edges(&self) -> impl Iterator<Item = (ModuleId, ModuleId)> + '_ {
        self.modules.windows(2).map(|pair| (pair[0], pair[1]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> (HashMap<String, ModuleId>, Vec<ModuleKind>) {
        let modules = [
            ("in", ModuleKind::Input),
            ("buf", ModuleKind::Processor),
            ("out", ModuleKind::Output),
            ("stats", ModuleKind::Extension),
        ];
        let names = modules
            .iter()
            .enumerate()
            .map(|(i, (name, _))| ((*name).to_string(), ModuleId::new(i)))
            .collect();
        let kinds = modules.iter().map(|(_, kind)| *kind).collect();
        (names, kinds)
    }

    #[test]
    fn test_resolve_valid_route() {
        let (names, kinds) = registry();
        let route = Route::resolve(
            &RouteSpec::new("r1", &["in", "buf", "out"]).with_priority(3),
            &names,
            &kinds,
        )
        .expect("valid route");
        assert_eq!(route.priority, 3);
        let edges: Vec<_> = route.edges().collect();
        assert_eq!(
            edges,
            vec![
                (ModuleId::new(0), ModuleId::new(1)),
                (ModuleId::new(1), ModuleId::new(2))
            ]
        );
    }

    #[test]
    fn test_resolve_rejects_unknown_module() {
        let (names, kinds) = registry();
        let err = Route::resolve(&RouteSpec::new("r1", &["in", "nope"]), &names, &kinds)
            .expect_err("unknown module");
        assert_eq!(
            err,
            BuildError::UnknownModule {
                route: "r1".to_string(),
                module: "nope".to_string()
            }
        );
    }

    #[test]
    fn test_resolve_rejects_bad_shapes() {
        let (names, kinds) = registry();
        for path in [
            &["out", "in"][..],
            &["in", "out", "buf"][..],
            &["in"][..],
            &["in", "stats", "out"][..],
            &["in", "buf", "buf", "out"][..],
        ] {
            let result = Route::resolve(&RouteSpec::new("r", path), &names, &kinds);
            assert!(
                matches!(result, Err(BuildError::InvalidRoute { .. })),
                "{path:?} accepted"
            );
        }
        assert_eq!(
            Route::resolve(&RouteSpec::new("r", &[]), &names, &kinds),
            Err(BuildError::EmptyRoute("r".to_string()))
        );
    }

    #[test]
    fn test_route_spec_deserializes_with_defaults() {
        let spec: RouteSpec =
            serde_json::from_str(r#"{"name":"r","path":["in","out"]}"#).expect("parse");
        assert_eq!(spec.priority, 0);
        assert_eq!(spec.flow_control, FlowControl::default());
    }
}

//! # Features
//!
//! A feature is a self-contained application module: a unique name, an
//! optional resource directory (migrations, i18n bundles, assets), the
//! features it depends on, and two hooks run at startup: `init` and
//! `init_routes`.
//!
//! The hook argument types are generic so this crate stays transport
//! agnostic; the axum crate fixes them to its own init context and route
//! table.
//!
//! [`resolve_order`] validates names, pulls in transitive dependencies and
//! returns the features in an order where every feature follows all of
//! its dependencies.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

pub type InitFn<C> = Box<dyn Fn(&mut C) -> anyhow::Result<()> + Send + Sync>;
pub type RoutesFn<R> = Box<dyn Fn(&mut R) -> anyhow::Result<()> + Send + Sync>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FeatureError {
    #[error("duplicate feature name: {0}")]
    Duplicate(String),

    #[error("feature name must not be empty")]
    EmptyName,

    #[error("dependency cycle detected between features: {}", .0.join(", "))]
    Cycle(Vec<String>),
}

pub struct Feature<C, R> {
    name: String,
    resources: Option<PathBuf>,
    dependencies: Vec<Arc<Feature<C, R>>>,
    init: Option<InitFn<C>>,
    init_routes: Option<RoutesFn<R>>,
}

impl<C, R> fmt::Debug for Feature<C, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Feature")
            .field("name", &self.name)
            .field("resources", &self.resources)
            .field("dependencies", &self.dependency_names())
            .finish()
    }
}

impl<C, R> Feature<C, R> {
    pub fn builder(name: impl Into<String>) -> FeatureBuilder<C, R> {
        FeatureBuilder {
            feature: Feature {
                name: name.into(),
                resources: None,
                dependencies: Vec::new(),
                init: None,
                init_routes: None,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resources(&self) -> Option<&Path> {
        self.resources.as_deref()
    }

    /// A sub-directory of the resource bundle, if the bundle has it.
    pub fn resource_dir(&self, sub: &str) -> Option<PathBuf> {
        let dir = self.resources.as_ref()?.join(sub);
        dir.is_dir().then_some(dir)
    }

    pub fn dependencies(&self) -> &[Arc<Feature<C, R>>] {
        &self.dependencies
    }

    pub fn dependency_names(&self) -> Vec<&str> {
        self.dependencies.iter().map(|d| d.name()).collect()
    }

    pub fn init(&self, ctx: &mut C) -> anyhow::Result<()> {
        match &self.init {
            Some(f) => f(ctx),
            None => Ok(()),
        }
    }

    pub fn init_routes(&self, routes: &mut R) -> anyhow::Result<()> {
        match &self.init_routes {
            Some(f) => f(routes),
            None => Ok(()),
        }
    }
}

pub struct FeatureBuilder<C, R> {
    feature: Feature<C, R>,
}

impl<C, R> FeatureBuilder<C, R> {
    pub fn resources(mut self, dir: impl Into<PathBuf>) -> Self {
        self.feature.resources = Some(dir.into());
        self
    }

    pub fn depends_on(mut self, dependency: &Arc<Feature<C, R>>) -> Self {
        self.feature.dependencies.push(Arc::clone(dependency));
        self
    }

    pub fn on_init<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut C) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.feature.init = Some(Box::new(f));
        self
    }

    pub fn on_routes<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut R) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.feature.init_routes = Some(Box::new(f));
        self
    }

    pub fn build(self) -> Arc<Feature<C, R>> {
        Arc::new(self.feature)
    }
}

/// Order features so that each one comes after all of its dependencies.
///
/// Names in `features` must be unique. Dependencies that were not listed
/// are added automatically; a dependency that shares a name with a listed
/// feature is treated as that feature. Ties keep the input order, so the
/// result is deterministic.
pub fn resolve_order<C, R>(
    features: &[Arc<Feature<C, R>>],
) -> Result<Vec<Arc<Feature<C, R>>>, FeatureError> {
    let mut nodes: Vec<Arc<Feature<C, R>>> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for feature in features {
        if feature.name.trim().is_empty() {
            return Err(FeatureError::EmptyName);
        }
        if index.contains_key(&feature.name) {
            return Err(FeatureError::Duplicate(feature.name.clone()));
        }
        index.insert(feature.name.clone(), nodes.len());
        nodes.push(Arc::clone(feature));
    }

    // Expand transitive dependencies breadth-first.
    let mut cursor = 0;
    while cursor < nodes.len() {
        let deps: Vec<Arc<Feature<C, R>>> = nodes[cursor].dependencies.clone();
        for dep in deps {
            if dep.name.trim().is_empty() {
                return Err(FeatureError::EmptyName);
            }
            if !index.contains_key(&dep.name) {
                index.insert(dep.name.clone(), nodes.len());
                nodes.push(dep);
            }
        }
        cursor += 1;
    }

    // Kahn's algorithm: edge dependency -> dependent.
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    let mut in_degree: Vec<usize> = vec![0; nodes.len()];

    for (i, node) in nodes.iter().enumerate() {
        let mut seen: Vec<usize> = Vec::new();
        for dep in &node.dependencies {
            let d = index[&dep.name];
            if seen.contains(&d) {
                continue;
            }
            seen.push(d);
            dependents[d].push(i);
            in_degree[i] += 1;
        }
    }

    let mut queue: VecDeque<usize> = (0..nodes.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order: Vec<usize> = Vec::with_capacity(nodes.len());

    while let Some(i) = queue.pop_front() {
        order.push(i);
        for &next in &dependents[i] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                queue.push_back(next);
            }
        }
    }

    if order.len() != nodes.len() {
        let stuck = (0..nodes.len())
            .filter(|i| in_degree[*i] > 0)
            .map(|i| nodes[i].name.clone())
            .collect();
        return Err(FeatureError::Cycle(stuck));
    }

    tracing::debug!(
        order = ?order.iter().map(|&i| nodes[i].name.as_str()).collect::<Vec<_>>(),
        "features resolved"
    );

    Ok(order.into_iter().map(|i| Arc::clone(&nodes[i])).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    type TestFeature = Feature<Vec<String>, ()>;

    fn names(features: &[Arc<TestFeature>]) -> Vec<String> {
        features.iter().map(|f| f.name().to_string()).collect()
    }

    fn position(order: &[String], name: &str) -> usize {
        order.iter().position(|n| n == name).unwrap()
    }

    #[test]
    fn dependencies_precede_dependents() {
        let db = TestFeature::builder("db").build();
        let auth = TestFeature::builder("auth").depends_on(&db).build();
        let mail = TestFeature::builder("mail").build();
        let notes = TestFeature::builder("notes")
            .depends_on(&auth)
            .depends_on(&mail)
            .build();

        let sorted = resolve_order(&[notes.clone(), mail.clone(), auth.clone(), db.clone()]).unwrap();
        let order = names(&sorted);

        assert_eq!(order.len(), 4);
        assert!(position(&order, "db") < position(&order, "auth"));
        assert!(position(&order, "auth") < position(&order, "notes"));
        assert!(position(&order, "mail") < position(&order, "notes"));
    }

    #[test]
    fn transitive_dependencies_are_pulled_in() {
        let db = TestFeature::builder("db").build();
        let auth = TestFeature::builder("auth").depends_on(&db).build();
        let notes = TestFeature::builder("notes").depends_on(&auth).build();

        let sorted = resolve_order(&[notes]).unwrap();
        assert_eq!(names(&sorted), vec!["db", "auth", "notes"]);
    }

    #[test]
    fn independent_features_keep_input_order() {
        let a = TestFeature::builder("a").build();
        let b = TestFeature::builder("b").build();
        let c = TestFeature::builder("c").build();

        let sorted = resolve_order(&[c, a, b]).unwrap();
        assert_eq!(names(&sorted), vec!["c", "a", "b"]);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let a1 = TestFeature::builder("a").build();
        let a2 = TestFeature::builder("a").build();
        assert_eq!(
            resolve_order(&[a1, a2]).unwrap_err(),
            FeatureError::Duplicate("a".to_string())
        );
    }

    #[test]
    fn cycles_are_reported_instead_of_partial_orders() {
        // a -> b -> a, built through a shared dependency name.
        let a_stub = TestFeature::builder("a").build();
        let b = TestFeature::builder("b").depends_on(&a_stub).build();
        let a = TestFeature::builder("a").depends_on(&b).build();
        let free = TestFeature::builder("free").build();

        let err = resolve_order(&[a, free]).unwrap_err();
        match err {
            FeatureError::Cycle(mut stuck) => {
                stuck.sort();
                assert_eq!(stuck, vec!["a", "b"]);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn hooks_run_with_the_supplied_context() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in_hook = Arc::clone(&seen);
        let feature = TestFeature::builder("notes")
            .on_init(move |ctx: &mut Vec<String>| {
                ctx.push("init".to_string());
                seen_in_hook.lock().unwrap().push("called".to_string());
                Ok(())
            })
            .build();

        let mut ctx = Vec::new();
        feature.init(&mut ctx).unwrap();
        feature.init_routes(&mut ()).unwrap();

        assert_eq!(ctx, vec!["init"]);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}

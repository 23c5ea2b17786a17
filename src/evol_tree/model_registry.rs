use std::collections::HashMap;

use log::debug;

use crate::evol_model::EvolModel;

/// Fitted models of one tree, keyed by their unique name.
#[derive(Clone, Debug, Default)]
pub struct ModelRegistry {
    models: HashMap<String, EvolModel>,
}

/// Next candidate name for a taken model name: `M0` becomes `M0__1`, `M0__1` becomes `M0__2`.
pub(crate) fn next_name(name: &str) -> String {
    match name.rsplit_once("__") {
        Some((base, suffix)) => match suffix.parse::<usize>() {
            Ok(n) => format!("{}__{}", base, n + 1),
            Err(_) => format!("{}__1", name),
        },
        None => format!("{}__1", name),
    }
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// First name derived from `name` that is not taken yet, `name` itself if it is free.
    pub fn unique_name(&self, name: &str) -> String {
        let mut name = name.to_string();
        while self.models.contains_key(&name) {
            name = next_name(&name);
        }
        name
    }

    /// Stores the model, renaming it first if its name is already taken.
    /// Never overwrites a registered model. Returns the name the model is stored under.
    pub fn insert_unique(&mut self, mut model: EvolModel) -> String {
        let name = self.unique_name(&model.name);
        if name != model.name {
            debug!("Model name {} is taken, registering as {}", model.name, name);
            model.name = name.clone();
        }
        self.models.insert(name.clone(), model);
        name
    }

    pub fn get(&self, name: &str) -> Option<&EvolModel> {
        self.models.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut EvolModel> {
        self.models.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Registered model names in alphabetical order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.models.keys().map(String::as_str).collect();
        names.sort();
        names
    }

    pub fn iter(&self) -> impl Iterator<Item = &EvolModel> {
        self.models.values()
    }
}

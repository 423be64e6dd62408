use std::{collections::BTreeMap, path::Path, sync::Arc};

use tracing::info;

use crate::{
    decoder::{self, DecoderStep},
    environment::Environment,
    error::{OrtError, Result},
    session::{Session, SessionIo, SessionSettings},
    tensor::{TensorInputs, TensorMap},
};

/// Sessions keyed by model type name, all created against one environment.
#[derive(Debug)]
pub struct SessionRegistry {
    env: Arc<Environment>,
    settings: SessionSettings,
    sessions: BTreeMap<String, Session>,
}

impl SessionRegistry {
    pub fn new(env: Arc<Environment>, settings: SessionSettings) -> Self {
        Self {
            env,
            settings,
            sessions: BTreeMap::new(),
        }
    }

    pub fn environment(&self) -> &Arc<Environment> {
        &self.env
    }

    /// Creates a session for `path` and registers it under `type_name`.
    ///
    /// Nothing is registered when creation fails. A session already registered
    /// under the same name is replaced.
    pub fn create_session(&mut self, path: &Path, type_name: &str) -> Result<()> {
        let session = Session::create(&self.env, path, type_name, &self.settings)?;
        if self.sessions.insert(type_name.to_string(), session).is_some() {
            info!(model = type_name, "replaced existing session");
        }
        Ok(())
    }

    pub fn get(&self, type_name: &str) -> Option<&Session> {
        self.sessions.get(type_name)
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.sessions.contains_key(type_name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sessions.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn run(&self, type_name: &str, inputs: &TensorInputs<'_>) -> Result<TensorMap> {
        self.sessions
            .get(type_name)
            .ok_or_else(|| OrtError::SessionNotFound(type_name.to_string()))?
            .run(inputs)
    }

    pub fn run_with_key_value_cache(
        &self,
        model_name: &str,
        step: &DecoderStep<'_>,
    ) -> Result<TensorMap> {
        decoder::run_with_key_value_cache(model_name, step, |name, inputs| self.run(name, inputs))
    }

    pub fn describe(&self, type_name: &str) -> Result<SessionIo> {
        self.sessions
            .get(type_name)
            .ok_or_else(|| OrtError::SessionNotFound(type_name.to_string()))?
            .io()
    }
}

use std::fmt;

use fastvlm_ort::{
    DecoderStep, Result as OrtResult, SessionIo, SessionRegistry, TensorInputs, TensorMap, decoder,
};

/// The three exported graphs that make up a FastVLM model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ModelComponent {
    VisionEncoder,
    EmbedTokens,
    DecoderModelMerged,
}

impl ModelComponent {
    pub const ALL: [Self; 3] = [Self::VisionEncoder, Self::EmbedTokens, Self::DecoderModelMerged];

    /// Session name, which is also the model file prefix.
    pub fn session_name(self) -> &'static str {
        match self {
            Self::VisionEncoder => "vision_encoder",
            Self::EmbedTokens => "embed_tokens",
            Self::DecoderModelMerged => "decoder_model_merged",
        }
    }
}

impl fmt::Display for ModelComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.session_name())
    }
}

/// Runs named model sessions.
///
/// Implemented by [`SessionRegistry`] for real models; tests substitute
/// in-memory stubs.
pub trait InferenceBackend: Send {
    fn run(&self, session: &str, inputs: &TensorInputs<'_>) -> OrtResult<TensorMap>;

    fn describe(&self, component: ModelComponent) -> OrtResult<SessionIo>;

    fn run_with_key_value_cache(
        &self,
        model_name: &str,
        step: &DecoderStep<'_>,
    ) -> OrtResult<TensorMap> {
        decoder::run_with_key_value_cache(model_name, step, |name, inputs| self.run(name, inputs))
    }
}

impl InferenceBackend for SessionRegistry {
    fn run(&self, session: &str, inputs: &TensorInputs<'_>) -> OrtResult<TensorMap> {
        SessionRegistry::run(self, session, inputs)
    }

    fn describe(&self, component: ModelComponent) -> OrtResult<SessionIo> {
        SessionRegistry::describe(self, component.session_name())
    }
}

impl<B: InferenceBackend + ?Sized> InferenceBackend for Box<B> {
    fn run(&self, session: &str, inputs: &TensorInputs<'_>) -> OrtResult<TensorMap> {
        (**self).run(session, inputs)
    }

    fn describe(&self, component: ModelComponent) -> OrtResult<SessionIo> {
        (**self).describe(component)
    }

    fn run_with_key_value_cache(
        &self,
        model_name: &str,
        step: &DecoderStep<'_>,
    ) -> OrtResult<TensorMap> {
        (**self).run_with_key_value_cache(model_name, step)
    }
}

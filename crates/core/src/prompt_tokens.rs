pub const IMAGE_PLACEHOLDER: &str = "<image>";
pub const IM_START: &str = "<|im_start|>";
pub const IM_END: &str = "<|im_end|>";
pub const END_OF_TEXT: &str = "<|endoftext|>";

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// ChatML template used when `tokenizer_config.json` carries none.
pub const DEFAULT_CHAT_TEMPLATE: &str = "{% for message in messages %}{% if loop.first and messages[0]['role'] != 'system' %}{{ '<|im_start|>system\nYou are a helpful assistant.<|im_end|>\n' }}{% endif %}{{'<|im_start|>' + message['role'] + '\n' + message['content'] + '<|im_end|>' + '\n'}}{% endfor %}{% if add_generation_prompt %}{{ '<|im_start|>assistant\n' }}{% endif %}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptBuildOptions<'a> {
    pub system_prompt: &'a str,
    pub placeholder: &'a str,
    pub add_generation_prompt: bool,
}

impl Default for PromptBuildOptions<'_> {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT,
            placeholder: IMAGE_PLACEHOLDER,
            add_generation_prompt: true,
        }
    }
}

impl<'a> PromptBuildOptions<'a> {
    pub fn with_system_prompt(mut self, system_prompt: &'a str) -> Self {
        self.system_prompt = system_prompt;
        self
    }

    pub fn with_generation_prompt(mut self, enabled: bool) -> Self {
        self.add_generation_prompt = enabled;
        self
    }
}

/// Wraps `user_message` in the system/user/assistant ChatML turns with the
/// image placeholder directly in front of the user text.
pub fn render_chat_prompt(user_message: &str, options: PromptBuildOptions<'_>) -> String {
    let mut prompt = String::with_capacity(user_message.len() + 128);
    prompt.push_str(IM_START);
    prompt.push_str("system\n");
    prompt.push_str(options.system_prompt);
    prompt.push_str(IM_END);
    prompt.push('\n');

    prompt.push_str(IM_START);
    prompt.push_str("user\n");
    prompt.push_str(options.placeholder);
    prompt.push_str(user_message);
    prompt.push_str(IM_END);
    prompt.push('\n');

    if options.add_generation_prompt {
        prompt.push_str(IM_START);
        prompt.push_str("assistant\n");
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_chatml_turns() {
        let prompt = render_chat_prompt("Describe this image.", PromptBuildOptions::default());
        assert_eq!(
            prompt,
            "<|im_start|>system\nYou are a helpful assistant.<|im_end|>\n\
             <|im_start|>user\n<image>Describe this image.<|im_end|>\n\
             <|im_start|>assistant\n"
        );
    }

    #[test]
    fn generation_prompt_is_optional() {
        let prompt = render_chat_prompt(
            "hi",
            PromptBuildOptions::default().with_generation_prompt(false),
        );
        assert!(prompt.ends_with("<image>hi<|im_end|>\n"));
        assert_eq!(prompt.matches(IMAGE_PLACEHOLDER).count(), 1);
    }
}

use regex::Regex;

/// Decides which chat messages reach the agent: the sender must match the
/// player pattern (when set) and the message must contain the wake word
/// (when set).
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    player_pattern: Option<Regex>,
    wake_word: Option<String>,
}

impl MessageFilter {
    pub fn new(player_pattern: Option<&str>, wake_word: Option<&str>) -> Result<Self, regex::Error> {
        let player_pattern = player_pattern
            .filter(|pattern| !pattern.is_empty())
            .map(Regex::new)
            .transpose()?;
        let wake_word = wake_word
            .filter(|word| !word.is_empty())
            .map(ToString::to_string);
        Ok(Self {
            player_pattern,
            wake_word,
        })
    }

    pub fn accepts(&self, sender: &str, message: &str) -> bool {
        if let Some(pattern) = self.player_pattern.as_ref() {
            if !pattern.is_match(sender) {
                return false;
            }
        }
        match self.wake_word.as_deref() {
            Some(word) => message.contains(word),
            None => true,
        }
    }
}

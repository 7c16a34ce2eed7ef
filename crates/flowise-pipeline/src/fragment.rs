/// One unit of output handed to the chat surface.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFragment {
    /// Markdown appended to the visible transcript.
    Text(String),
    /// Ephemeral progress indicator, not part of the transcript.
    Status { description: String, done: bool },
}

impl OutputFragment {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn status(description: impl Into<String>, done: bool) -> Self {
        Self::Status {
            description: description.into(),
            done,
        }
    }

    /// Returns the transcript text, or `None` for status updates.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Status { .. } => None,
        }
    }
}

/// Concatenates the transcript text of `fragments`, skipping status updates.
pub fn concat_text<'a>(fragments: impl IntoIterator<Item = &'a OutputFragment>) -> String {
    fragments
        .into_iter()
        .filter_map(OutputFragment::as_text)
        .collect()
}

use glance_contracts::events::now_utc_iso;
use glance_contracts::turns::{ChatTurn, Role};
use uuid::Uuid;

use crate::image_input::UploadedImage;

/// Everything one user session remembers: the transcript and at most one
/// image. Turns are append-only; there is no deletion.
#[derive(Debug, Clone)]
pub struct SessionState {
    session_id: String,
    started_at: String,
    turns: Vec<ChatTurn>,
    image: Option<UploadedImage>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            started_at: now_utc_iso(),
            turns: Vec::new(),
            image: None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn started_at(&self) -> &str {
        &self.started_at
    }

    pub fn append_turn(&mut self, role: Role, content: impl Into<String>) -> &ChatTurn {
        self.turns.push(ChatTurn::new(role, content));
        &self.turns[self.turns.len() - 1]
    }

    /// Stores `image` as the session image and hands back the one it replaced.
    pub fn set_image(&mut self, image: UploadedImage) -> Option<UploadedImage> {
        self.image.replace(image)
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn last_turn(&self) -> Option<&ChatTurn> {
        self.turns.last()
    }

    pub fn image(&self) -> Option<&UploadedImage> {
        self.image.as_ref()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

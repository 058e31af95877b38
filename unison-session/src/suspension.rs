use crate::error::SessionError;
use crate::session::Session;

/// Handle to an active local suspension. While it lives, the coordinator
/// keeps tracking the group but drives no actions into the local player.
///
/// Dropping the handle without calling [`Suspension::end`] ends the
/// suspension without a resume seek.
pub struct Suspension {
    session: Session,
    ended: bool,
}

impl Suspension {
    pub(crate) fn new(session: Session) -> Self {
        Self {
            session,
            ended: false,
        }
    }

    /// End the suspension: the player is reconciled with the current group
    /// state in one `sync_local` action, and `resume_position`, when given,
    /// is seeked to once the group is neither suspended nor waiting.
    pub async fn end(mut self, resume_position: Option<f64>) -> Result<(), SessionError> {
        self.ended = true;
        self.session.end_suspension(resume_position).await
    }
}

impl Drop for Suspension {
    fn drop(&mut self) {
        if !self.ended {
            self.session.abort_suspension();
        }
    }
}

//! Follow-up questions about a finished analysis.
//!
//! Stateless: every call carries the full prior history, supplied and kept
//! by the caller, plus a JSON snapshot of the analysis being discussed.
//! Nothing here touches the pipeline state.

use crate::backend::{ChatTurn, RequestKind, VisionBackend, VisionRequest};
use crate::error::SchematicError;
use crate::model::SchematicAnalysis;
use crate::prompts::chat_system_prompt;
use tracing::debug;

/// Ask one question about `analysis` and return the backend's reply.
pub async fn ask(
    backend: &dyn VisionBackend,
    history: &[ChatTurn],
    message: &str,
    analysis: &SchematicAnalysis,
) -> Result<String, SchematicError> {
    let snapshot = serde_json::to_string(analysis)?;
    debug!(
        "Chat: {} prior turn(s), snapshot {} bytes",
        history.len(),
        snapshot.len()
    );

    let request = VisionRequest {
        kind: RequestKind::Chat,
        instruction: chat_system_prompt(&snapshot),
        images: Vec::new(),
        history: history.to_vec(),
        message: message.to_string(),
        temperature: 0.3,
        max_tokens: 2048,
    };

    let response = backend.generate(request).await?;
    Ok(response.content.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ChatRole, VisionResponse};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingBackend {
        seen: Mutex<Option<VisionRequest>>,
    }

    #[async_trait]
    impl VisionBackend for RecordingBackend {
        fn name(&self) -> &str {
            "recording"
        }

        async fn generate(&self, request: VisionRequest) -> Result<VisionResponse, SchematicError> {
            *self.seen.lock().unwrap() = Some(request);
            Ok(VisionResponse {
                content: "  R1 sets the gain.\n".into(),
                ..Default::default()
            })
        }
    }

    fn analysis() -> SchematicAnalysis {
        SchematicAnalysis {
            title: "Gain stage".into(),
            overview: String::new(),
            components: vec![],
            functional_blocks: vec![],
            connectivity_logic: String::new(),
            netlist: vec![],
            potential_issues: vec![],
        }
    }

    #[tokio::test]
    async fn sends_history_message_and_snapshot() {
        let backend = RecordingBackend::default();
        let history = vec![ChatTurn::user("What is this?"), ChatTurn::assistant("A gain stage.")];

        let reply = ask(&backend, &history, "Which part sets gain?", &analysis())
            .await
            .unwrap();
        assert_eq!(reply, "R1 sets the gain.");

        let seen = backend.seen.lock().unwrap().take().unwrap();
        assert_eq!(seen.kind, RequestKind::Chat);
        assert_eq!(seen.history.len(), 2);
        assert_eq!(seen.history[1].role, ChatRole::Assistant);
        assert_eq!(seen.message, "Which part sets gain?");
        assert!(seen.instruction.contains("\"title\":\"Gain stage\""));
        assert!(seen.images.is_empty());
    }
}

//! The durable conversation state machine.
//!
//! One identity = one run-loop task = one writer. Callers interact through a
//! `ConversationHandle`: `submit` places a message in the single pending slot
//! and parks until the loop reaches a terminal outcome for it; `history`
//! reads the last committed snapshot. When retained history crosses the
//! continuation threshold the loop returns its restart payload and the
//! supervisor starts it again on the same handle, which is indistinguishable
//! from the outside.

use std::sync::Arc;

use tokio::sync::{oneshot, watch, Mutex, Notify};
use tracing::{info, warn};

use confab_core::config::ConversationConfig;
use confab_core::{
    conversation_id, retain_history, ConversationArgs, ConversationError, ConversationResult,
    Message, Turn,
};

use crate::runner::{AgentConfig, AgentRunner};

#[derive(Clone, Copy, Debug)]
pub struct ConversationSettings {
    /// Upper bound on retained history; oldest turns are evicted at commit.
    pub max_history_turns: usize,
    /// Retained length at which the run loop checkpoints itself forward.
    pub continue_after_turns: usize,
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self { max_history_turns: 50, continue_after_turns: 40 }
    }
}

impl From<&ConversationConfig> for ConversationSettings {
    fn from(config: &ConversationConfig) -> Self {
        Self {
            max_history_turns: config.max_history_turns,
            continue_after_turns: config.continue_after_turns,
        }
    }
}

struct PendingMessage {
    message: Message,
    reply: oneshot::Sender<Result<ConversationResult, ConversationError>>,
}

/// State shared between the handle and the run loop. It outlives any single
/// run segment, which is what makes checkpoint restarts invisible.
struct Shared {
    slot: Mutex<Option<PendingMessage>>,
    wakeup: Notify,
    history_tx: watch::Sender<Vec<Turn>>,
}

/// Client side of one conversation identity. Cheap to clone; all clones
/// address the same instance.
#[derive(Clone)]
pub struct ConversationHandle {
    id: String,
    user_id: String,
    shared: Arc<Shared>,
    history_rx: watch::Receiver<Vec<Turn>>,
}

impl ConversationHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Submits one message. Fails with `Conflict` when a message is already
    /// pending - submissions are never queued. On acceptance the caller is
    /// suspended until the run loop clears the slot with a terminal outcome.
    pub async fn submit(
        &self,
        message: Message,
    ) -> Result<ConversationResult, ConversationError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let mut slot = self.shared.slot.lock().await;
            if slot.is_some() {
                return Err(ConversationError::Conflict);
            }
            *slot = Some(PendingMessage { message, reply: reply_tx });
        }
        self.shared.wakeup.notify_one();

        reply_rx.await.map_err(|_| ConversationError::Terminated)?
    }

    /// Last committed history snapshot. Never blocks on a run in progress
    /// and never observes a partially appended turn.
    pub fn history(&self) -> Vec<Turn> {
        self.history_rx.borrow().clone()
    }
}

/// Spawns the run loop for one identity and returns its handle. The
/// supervisor loop re-enters `run_conversation` with the checkpoint payload,
/// keeping the identity and its channels alive across restarts.
pub fn spawn_conversation(
    args: ConversationArgs,
    settings: ConversationSettings,
    agent: AgentConfig,
    runner: Arc<dyn AgentRunner>,
) -> ConversationHandle {
    let (history_tx, history_rx) = watch::channel(args.history.clone());
    let shared = Arc::new(Shared { slot: Mutex::new(None), wakeup: Notify::new(), history_tx });

    let handle = ConversationHandle {
        id: conversation_id(&args.user_id),
        user_id: args.user_id.clone(),
        shared: Arc::clone(&shared),
        history_rx,
    };

    tokio::spawn(async move {
        let mut args = args;
        loop {
            args = run_conversation(args, settings, &agent, runner.as_ref(), &shared).await;
            info!(
                event_name = "conversation.continued",
                conversation_id = %conversation_id(&args.user_id),
                history_len = args.history.len(),
                "instance restarted from checkpoint"
            );
        }
    });

    handle
}

/// One run segment: processes messages until the continuation threshold is
/// crossed, then returns the restart payload with the trimmed history.
async fn run_conversation(
    args: ConversationArgs,
    settings: ConversationSettings,
    agent: &AgentConfig,
    runner: &dyn AgentRunner,
    shared: &Shared,
) -> ConversationArgs {
    let id = conversation_id(&args.user_id);
    let mut history = args.history;
    shared.history_tx.send_replace(history.clone());

    info!(
        event_name = "conversation.run_started",
        conversation_id = %id,
        user_id = %args.user_id,
        history_len = history.len(),
        "starting conversation run loop"
    );

    loop {
        // Wait until a message is pending. The slot stays occupied for the
        // whole time the message is being processed.
        let (text, auth) = loop {
            {
                let slot = shared.slot.lock().await;
                if let Some(pending) = slot.as_ref() {
                    break (pending.message.text.clone(), pending.message.auth.clone());
                }
            }
            shared.wakeup.notified().await;
        };

        info!(
            event_name = "conversation.message_processing",
            conversation_id = %id,
            "processing pending message"
        );

        // Transient prompt scaffolding: caller identity plus the message
        // itself. Only the user turn survives retention.
        let mut input = history.clone();
        input.push(Turn::developer(auth.prompt_context()));
        input.push(Turn::user(text));

        let outcome = runner.run(agent, input, &auth).await;

        // The slot is taken exactly once, after the runner returns, on both
        // the success and the failure path. Nothing below may early-return
        // before the reply is sent, or the instance would wedge.
        let pending = shared.slot.lock().await.take();

        let reply = match outcome {
            Ok(output) => {
                history = retain_history(output.history, settings.max_history_turns);
                shared.history_tx.send_replace(history.clone());
                info!(
                    event_name = "conversation.message_committed",
                    conversation_id = %id,
                    history_len = history.len(),
                    "assistant turn committed"
                );
                Ok(ConversationResult { message: output.final_output })
            }
            Err(error) => {
                warn!(
                    event_name = "conversation.runner_failed",
                    conversation_id = %id,
                    error = %error,
                    "agent runner failed; history unchanged"
                );
                Err(ConversationError::RunnerFailure(error.to_string()))
            }
        };

        if let Some(pending) = pending {
            // A submitter that went away must not wedge the loop.
            let _ = pending.reply.send(reply);
        }

        if history.len() >= settings.continue_after_turns {
            info!(
                event_name = "conversation.checkpoint",
                conversation_id = %id,
                history_len = history.len(),
                "continuation threshold crossed, checkpointing forward"
            );
            return ConversationArgs::with_history(args.user_id, history);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use confab_core::{
        AuthContext, ContentSegment, ConversationArgs, ConversationError, Message, Role, Turn,
    };

    use super::{spawn_conversation, ConversationHandle, ConversationSettings};
    use crate::runner::{AgentConfig, AgentRunner, RunnerError, RunnerOutput};

    fn message(text: &str) -> Message {
        Message::new(text, AuthContext { user: Some("u1".to_string()), ..AuthContext::default() })
    }

    fn spawn_with(
        runner: Arc<dyn AgentRunner>,
        settings: ConversationSettings,
    ) -> ConversationHandle {
        spawn_conversation(
            ConversationArgs::new("u1"),
            settings,
            AgentConfig::default(),
            runner,
        )
    }

    /// Appends one assistant turn answering the last user turn, mirroring the
    /// flattened-history contract.
    struct EchoRunner;

    #[async_trait]
    impl AgentRunner for EchoRunner {
        async fn run(
            &self,
            _config: &AgentConfig,
            history: Vec<Turn>,
            _auth: &AuthContext,
        ) -> Result<RunnerOutput, RunnerError> {
            let last_user = history
                .iter()
                .rev()
                .find(|turn| turn.role == Role::User)
                .and_then(Turn::visible_text)
                .unwrap_or_default();
            let reply = format!("echo: {last_user}");

            let mut flattened = history;
            flattened.push(Turn::assistant(reply.clone()));
            Ok(RunnerOutput { final_output: reply, history: flattened })
        }
    }

    /// Parks inside `run` until released, so tests can observe the
    /// Processing state deterministically.
    struct GatedRunner {
        entered: Notify,
        release: Notify,
    }

    impl GatedRunner {
        fn new() -> Arc<Self> {
            Arc::new(Self { entered: Notify::new(), release: Notify::new() })
        }
    }

    #[async_trait]
    impl AgentRunner for GatedRunner {
        async fn run(
            &self,
            _config: &AgentConfig,
            history: Vec<Turn>,
            _auth: &AuthContext,
        ) -> Result<RunnerOutput, RunnerError> {
            self.entered.notify_one();
            self.release.notified().await;

            let mut flattened = history;
            flattened.push(Turn::assistant("done"));
            Ok(RunnerOutput { final_output: "done".to_string(), history: flattened })
        }
    }

    /// Fails the first `failures` runs, then behaves like `EchoRunner`.
    struct FlakyRunner {
        failures: usize,
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl AgentRunner for FlakyRunner {
        async fn run(
            &self,
            config: &AgentConfig,
            history: Vec<Turn>,
            auth: &AuthContext,
        ) -> Result<RunnerOutput, RunnerError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.failures {
                return Err(RunnerError::Model("model endpoint unreachable".to_string()));
            }
            EchoRunner.run(config, history, auth).await
        }
    }

    #[tokio::test]
    async fn first_submit_retains_exactly_one_exchange() {
        let handle = spawn_with(Arc::new(EchoRunner), ConversationSettings::default());

        let result = handle.submit(message("add item X")).await.expect("submit should succeed");
        assert_eq!(result.message, "echo: add item X");

        let history = handle.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[0].visible_text().as_deref(), Some("add item X"));
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history[1].visible_text().as_deref(), Some("echo: add item X"));
    }

    #[tokio::test]
    async fn second_submit_conflicts_until_the_first_completes() {
        let runner = GatedRunner::new();
        let handle = spawn_with(runner.clone(), ConversationSettings::default());

        let first = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.submit(message("first")).await })
        };
        runner.entered.notified().await;

        // While the first message is processing, the slot stays occupied and
        // the committed snapshot is still empty.
        let conflict = handle.submit(message("second")).await.expect_err("must conflict");
        assert_eq!(conflict, ConversationError::Conflict);
        assert_eq!(conflict.to_string(), "message already set, cannot update");
        assert!(handle.history().is_empty());

        runner.release.notify_one();
        let result = first.await.expect("task join").expect("first submit should succeed");
        assert_eq!(result.message, "done");

        // The slot has been cleared; a resubmission is now accepted.
        let second = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.submit(message("second, again")).await })
        };
        runner.entered.notified().await;
        runner.release.notify_one();
        second.await.expect("task join").expect("second submit should succeed");

        assert_eq!(handle.history().len(), 4);
    }

    #[tokio::test]
    async fn concurrent_submits_admit_exactly_one() {
        let runner = GatedRunner::new();
        let handle = spawn_with(runner.clone(), ConversationSettings::default());

        let submits: Vec<_> = (0..5)
            .map(|index| {
                let handle = handle.clone();
                tokio::spawn(async move { handle.submit(message(&format!("m{index}"))).await })
            })
            .collect();

        runner.entered.notified().await;
        runner.release.notify_one();

        let mut accepted = 0;
        let mut conflicts = 0;
        for submit in submits {
            match submit.await.expect("task join") {
                Ok(_) => accepted += 1,
                Err(ConversationError::Conflict) => conflicts += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(accepted, 1);
        assert_eq!(conflicts, 4);
    }

    #[tokio::test]
    async fn runner_failure_releases_the_slot() {
        let runner =
            Arc::new(FlakyRunner { failures: 1, attempts: AtomicUsize::new(0) });
        let handle = spawn_with(runner, ConversationSettings::default());

        let error = handle.submit(message("first")).await.expect_err("first run fails");
        assert!(matches!(error, ConversationError::RunnerFailure(_)));
        assert!(handle.history().is_empty(), "failed runs must not commit history");

        // The slot was released on the failure path; the instance is usable.
        let result = handle.submit(message("retry")).await.expect("retry should succeed");
        assert_eq!(result.message, "echo: retry");
        assert_eq!(handle.history().len(), 2);
    }

    #[tokio::test]
    async fn transient_scaffolding_never_reaches_retained_history() {
        struct ScaffoldingRunner;

        #[async_trait]
        impl AgentRunner for ScaffoldingRunner {
            async fn run(
                &self,
                _config: &AgentConfig,
                history: Vec<Turn>,
                _auth: &AuthContext,
            ) -> Result<RunnerOutput, RunnerError> {
                let mut flattened = history;
                flattened.push(Turn::developer("[tool get_queue] Queue contents: …"));
                flattened.push(Turn::assistant_segments(vec![
                    ContentSegment::reasoning("the queue holds one widget"),
                    ContentSegment::output_text("Your queue holds one widget."),
                ]));
                Ok(RunnerOutput {
                    final_output: "Your queue holds one widget.".to_string(),
                    history: flattened,
                })
            }
        }

        let handle = spawn_with(Arc::new(ScaffoldingRunner), ConversationSettings::default());
        handle.submit(message("what's in my queue?")).await.expect("submit should succeed");

        let history = handle.history();
        assert_eq!(history.len(), 2, "developer turns are stripped before commit");
        assert!(history.iter().all(|turn| turn.role != Role::Developer));
        assert_eq!(
            history[1].visible_text().as_deref(),
            Some("Your queue holds one widget."),
            "only output text surfaces from segmented assistant turns"
        );
    }

    #[tokio::test]
    async fn fifty_one_submissions_keep_the_fifty_most_recent_turns() {
        let settings = ConversationSettings { max_history_turns: 50, continue_after_turns: 50 };
        let handle = spawn_with(Arc::new(EchoRunner), settings);

        for index in 1..=51 {
            handle
                .submit(message(&format!("m{index}")))
                .await
                .unwrap_or_else(|error| panic!("submission {index} failed: {error}"));
        }

        let history = handle.history();
        assert_eq!(history.len(), 50);
        // 51 exchanges = 102 turns; the window starts at user turn 27.
        assert_eq!(history[0].visible_text().as_deref(), Some("m27"));
        assert_eq!(history[49].visible_text().as_deref(), Some("echo: m51"));
    }

    #[tokio::test]
    async fn checkpoint_restart_is_invisible_to_the_handle() {
        let settings = ConversationSettings { max_history_turns: 10, continue_after_turns: 4 };
        let handle = spawn_with(Arc::new(EchoRunner), settings);

        handle.submit(message("one")).await.expect("submit one");
        handle.submit(message("two")).await.expect("submit two");

        // Two exchanges crossed the threshold; the instance has restarted
        // with its trimmed history. The handle still addresses it and the
        // committed turns round-tripped exactly.
        let before = handle.history();
        assert_eq!(before.len(), 4);

        let result = handle.submit(message("three")).await.expect("submit three");
        assert_eq!(result.message, "echo: three");

        let after = handle.history();
        assert_eq!(after.len(), 6);
        assert_eq!(&after[..4], &before[..]);
        assert_eq!(handle.id(), "conversation_u1");
    }

    #[tokio::test]
    async fn read_history_is_idempotent() {
        let handle = spawn_with(Arc::new(EchoRunner), ConversationSettings::default());
        handle.submit(message("hello")).await.expect("submit should succeed");

        let first = handle.history();
        let second = handle.history();
        assert_eq!(first, second);
    }
}

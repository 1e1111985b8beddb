use std::path::PathBuf;
use std::time::Duration;

use agent_protocol::TabId;
use agent_tabs::config::RuntimeConfig;
use agent_tabs::render::Renderer;
use agent_tabs::supervisor::{Supervisor, TabHandle, TabLauncher, TabStatus, UiEvent};
use agent_tabs::worker::{run_worker, WorkerOptions};
use tab_bus::{BusConnection, BusListener, BusMessage, TabMode};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::LocalSet;

const STEP: Duration = Duration::from_millis(400);
const RUN_LIMIT: Duration = Duration::from_secs(15);

/// Runs workers as local tasks instead of child processes.
struct InProcessLauncher {
    socket: PathBuf,
    root: PathBuf,
    config: RuntimeConfig,
}

impl TabLauncher for InProcessLauncher {
    fn launch(&mut self, tab_id: TabId, mode: TabMode) -> anyhow::Result<TabHandle> {
        let socket = self.socket.clone();
        let config = self.config.clone();
        let options = WorkerOptions {
            tab_id,
            mode,
            root: self.root.clone(),
        };
        Ok(TabHandle::Task(tokio::task::spawn_local(async move {
            run_worker(&socket, options, &config).await
        })))
    }
}

/// Registers, then disconnects: a worker that crashed right after startup.
struct CrashingLauncher {
    socket: PathBuf,
}

impl TabLauncher for CrashingLauncher {
    fn launch(&mut self, tab_id: TabId, mode: TabMode) -> anyhow::Result<TabHandle> {
        let socket = self.socket.clone();
        Ok(TabHandle::Task(tokio::spawn(async move {
            let mut connection = BusConnection::connect(&socket).await?;
            connection.send(&BusMessage::Register { tab_id, mode }).await?;
            Ok(())
        })))
    }
}

fn play(events: UnboundedSender<UiEvent>, lines: Vec<&'static str>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        for line in lines {
            tokio::time::sleep(STEP).await;
            if events.send(UiEvent::Input(line.to_string())).is_err() {
                return;
            }
        }
    })
}

#[tokio::test]
async fn supervisor_routes_input_to_each_tab() {
    LocalSet::new()
        .run_until(async {
            let dir = tempfile::tempdir().expect("tempdir");
            let socket = dir.path().join("bus.sock");
            let listener = BusListener::bind(&socket).expect("bind");
            let launcher = InProcessLauncher {
                socket: socket.clone(),
                root: dir.path().to_path_buf(),
                config: RuntimeConfig {
                    api_url: "http://127.0.0.1:9".to_string(),
                    history: false,
                    ..RuntimeConfig::default()
                },
            };
            let mut supervisor =
                Supervisor::new(launcher, Renderer::new(Vec::new()).with_width(120));
            supervisor.open_tab(TabMode::History).expect("open history tab");

            let (events_tx, mut events) = mpsc::unbounded_channel();
            events_tx
                .send(UiEvent::Input("/help".to_string()))
                .expect("queue input");
            let script = play(events_tx, vec![":new chat", "/app", ":tabs", ":quit"]);

            tokio::time::timeout(RUN_LIMIT, supervisor.run(&listener, &mut events))
                .await
                .expect("supervisor did not finish")
                .expect("supervisor run");
            script.await.expect("script");

            let history = supervisor.tab(1).expect("history tab");
            assert!(history.view.contains_line("0 records in 0 sessions."));
            assert!(history.view.contains_line("History commands:"));
            assert_eq!(history.status, TabStatus::Exited);

            let chat = supervisor.tab(2).expect("chat tab");
            assert!(chat.view.contains_line("No app linked."));
            assert!(chat.view.contains_line("* 2: chat (running)"));
            assert!(chat.view.footer.is_some());
            assert!(!history.view.contains_line("No app linked."));
            assert_eq!(supervisor.active_tab(), Some(2));
        })
        .await;
}

#[tokio::test]
async fn crashed_worker_leaves_an_inert_tab() {
    let dir = tempfile::tempdir().expect("tempdir");
    let socket = dir.path().join("bus.sock");
    let listener = BusListener::bind(&socket).expect("bind");
    let mut supervisor = Supervisor::new(
        CrashingLauncher {
            socket: socket.clone(),
        },
        Renderer::new(Vec::new()).with_width(80),
    );
    supervisor.open_tab(TabMode::Chat).expect("open");

    let (events_tx, mut events) = mpsc::unbounded_channel();
    let script = play(events_tx, vec!["hello", ":quit"]);
    tokio::time::timeout(RUN_LIMIT, supervisor.run(&listener, &mut events))
        .await
        .expect("supervisor did not finish")
        .expect("supervisor run");
    script.await.expect("script");

    let tab = supervisor.tab(1).expect("tab");
    assert_eq!(tab.status, TabStatus::Exited);
    assert!(tab.view.contains_line("Tab 1 exited."));
    assert!(tab
        .view
        .contains_line("Tab 1 has exited. Type :new to open another."));
}

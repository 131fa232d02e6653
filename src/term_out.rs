//! Terminal output: a dedicated thread owns stderr, rendering a single
//! rewritable progress line and interleaving log lines above it.

use std::io::Write as _;
use std::sync::mpsc;
use std::time::{Duration, Instant};

const REFRESH_PERIOD: Duration = Duration::from_millis(100);

enum Msg {
    SetProgress(String),
    PrintLine(Vec<u8>),
    Finish,
}

pub fn init(start: Instant, enable_progress: bool) -> Handle {
    let (sender, receiver) = mpsc::channel();

    let join_handle = std::thread::Builder::new()
        .name("term out".into())
        .spawn(move || thread_main(start, enable_progress, receiver))
        .expect("failed to spawn terminal output thread");

    Handle {
        join_handle,
        sender,
    }
}

pub struct Handle {
    join_handle: std::thread::JoinHandle<()>,
    sender: mpsc::Sender<Msg>,
}

impl Handle {
    pub fn progress_print(&self) -> ProgressPrint {
        ProgressPrint {
            sender: self.sender.clone(),
        }
    }

    pub fn finish(self) {
        let _ = self.sender.send(Msg::Finish);
        self.join_handle
            .join()
            .expect("terminal output thread panicked");
    }
}

#[derive(Clone)]
pub struct ProgressPrint {
    sender: mpsc::Sender<Msg>,
}

impl ProgressPrint {
    pub fn set_progress(&self, progress: String) {
        let _ = self.sender.send(Msg::SetProgress(progress));
    }

    pub fn print_line(&self, line: Vec<u8>) {
        let _ = self.sender.send(Msg::PrintLine(line));
    }
}

fn thread_main(start: Instant, enable_progress: bool, receiver: mpsc::Receiver<Msg>) {
    let mut stderr = std::io::stderr();
    let mut progress = None::<String>;
    let mut last_render = None::<Instant>;

    loop {
        let msg = if progress.is_some() {
            // keep the elapsed-time prefix moving even when idle
            match receiver.recv_timeout(REFRESH_PERIOD) {
                Ok(msg) => Some(msg),
                Err(mpsc::RecvTimeoutError::Timeout) => None,
                Err(mpsc::RecvTimeoutError::Disconnected) => Some(Msg::Finish),
            }
        } else {
            match receiver.recv() {
                Ok(msg) => Some(msg),
                Err(mpsc::RecvError) => Some(Msg::Finish),
            }
        };

        match msg {
            Some(Msg::SetProgress(new_progress)) => {
                if !enable_progress {
                    continue;
                }
                let throttled =
                    last_render.is_some_and(|at| at.elapsed() < REFRESH_PERIOD);
                progress = Some(new_progress);
                if !throttled {
                    render(&mut stderr, start, progress.as_deref());
                    last_render = Some(Instant::now());
                }
            }
            Some(Msg::PrintLine(line)) => {
                if progress.is_some() {
                    clear_line(&mut stderr);
                }
                handle_err(stderr.write_all(&line));
                render(&mut stderr, start, progress.as_deref());
                handle_err(stderr.flush());
            }
            Some(Msg::Finish) => {
                if progress.is_some() {
                    render(&mut stderr, start, progress.as_deref());
                    handle_err(crossterm::queue!(
                        stderr,
                        crossterm::style::Print('\n'),
                        crossterm::cursor::MoveToColumn(0),
                    ));
                    handle_err(stderr.flush());
                }
                break;
            }
            None => {
                render(&mut stderr, start, progress.as_deref());
                last_render = Some(Instant::now());
            }
        }
    }
}

fn render(stderr: &mut std::io::Stderr, start: Instant, progress: Option<&str>) {
    let Some(progress) = progress else {
        return;
    };

    let elapsed = start.elapsed().as_secs();
    let line = format!(
        "[{:02}:{:02}:{:02}] {progress}",
        elapsed / 3600,
        (elapsed / 60) % 60,
        elapsed % 60,
    );
    handle_err(crossterm::queue!(
        stderr,
        crossterm::cursor::MoveToColumn(0),
        crossterm::style::Print(line),
        crossterm::terminal::Clear(crossterm::terminal::ClearType::UntilNewLine),
    ));
    handle_err(stderr.flush());
}

fn clear_line(stderr: &mut std::io::Stderr) {
    handle_err(crossterm::queue!(
        stderr,
        crossterm::terminal::Clear(crossterm::terminal::ClearType::CurrentLine),
        crossterm::cursor::MoveToColumn(0),
    ));
}

fn handle_err<T>(r: std::io::Result<T>) -> T {
    r.expect("stderr write failed")
}

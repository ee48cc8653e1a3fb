use std::io::Write as _;
use std::rc::Rc;

use anyhow::Context as _;
use parrot::supabase::SupabaseBackend;
use parrot::supabase::auth::SupabaseAuth;
use parrot::{
    Backend, ChatView, Identity, IdentityProvider, MemoryBackend, SessionGate, StaticIdentity,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Notify;

use crate::config::{BackendKind, Config};
use crate::terminal::{self, Command};

enum Exit {
    Quit,
    SignOut,
}

/// Sign in, mount the chat view and run it until the user quits. Must be called inside a
/// [`tokio::task::LocalSet`].
pub async fn run(config: Config) -> anyhow::Result<()> {
    match config.backend.clone() {
        BackendKind::Memory => {
            let gate = SessionGate::new(StaticIdentity::new(config.user.clone()));
            let backend = MemoryBackend::new();
            chat(&gate, |_| Ok(backend), &config).await
        }
        BackendKind::Supabase {
            connection,
            email,
            password,
        } => {
            let gate = SessionGate::new(SupabaseAuth::new(connection.clone(), email, password));
            chat(
                &gate,
                |identity| {
                    let access_token = identity
                        .access_token
                        .clone()
                        .context("Signed in without an access token")?;
                    Ok(SupabaseBackend::new(connection, access_token, &config.table))
                },
                &config,
            )
            .await
        }
    }
}

async fn chat<P, B>(
    gate: &SessionGate<P>,
    connect: impl FnOnce(&Identity) -> anyhow::Result<B>,
    config: &Config,
) -> anyhow::Result<()>
where
    P: IdentityProvider,
    B: Backend + 'static,
{
    let Some(identity) = gate.open().await.context("Failed to sign in")? else {
        anyhow::bail!("Nobody is signed in. Set NATTER_USER, or NATTER_EMAIL and NATTER_PASSWORD.");
    };

    let view = ChatView::mount(connect(&identity)?, &identity, config.merge)
        .context("Failed to open the conversation")?;

    let redraw = Rc::new(Notify::new());
    view.synchronizer().register_listener({
        let redraw = Rc::clone(&redraw);
        move |_, _| redraw.notify_one()
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    draw(&view, &identity, config.view_rows)?;

    let exit = loop {
        tokio::select! {
            _ = redraw.notified() => draw(&view, &identity, config.view_rows)?,
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read input")? else {
                    break Exit::Quit;
                };
                let synchronizer = view.synchronizer();
                match Command::parse(&line) {
                    Command::Quit => break Exit::Quit,
                    Command::SignOut => break Exit::SignOut,
                    Command::Retry => {
                        let retried = synchronizer.retry_failed();
                        log::info!("Retrying {retried} failed messages");
                    }
                    Command::Submit(text) => {
                        synchronizer.set_draft(text);
                        synchronizer.submit();
                    }
                }
            }
        }
    };

    match exit {
        Exit::Quit => view.unmount(),
        Exit::SignOut => gate.sign_out(view).await.context("Failed to sign out")?,
    }
    Ok(())
}

fn draw<B: Backend + 'static>(
    view: &ChatView<B>,
    identity: &Identity,
    rows: usize,
) -> anyhow::Result<()> {
    let projection = view.project(&chrono::Local);
    let draft = view.synchronizer().draft();

    let mut stdout = std::io::stdout().lock();
    // clear the screen and home the cursor
    write!(stdout, "\x1B[2J\x1B[H")?;
    for line in terminal::render(&projection, &identity.name, &draft, rows) {
        writeln!(stdout, "{line}")?;
    }
    stdout.flush()?;
    Ok(())
}

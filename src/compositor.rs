//! Core compositor implementation
//!
//! [`Compositor`] is the one context object that owns every subsystem: the
//! presentation engine, the renderer, the scene registry, loaded resources,
//! the shell windows, the control socket and the input source. The event
//! loop is a `calloop` loop over the display and input descriptors; each
//! tick runs the same fixed sequence:
//!
//! 1. wait for display or input readiness, at most one frame interval
//! 2. consume page-flip completions
//! 3. drain input into the shell
//! 4. accept one client and serve every complete request
//! 5. if no flip is pending, render and present one frame
//!
//! Requests served in step 4 are always visible in the frame of step 5.

use std::os::fd::OwnedFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use calloop::generic::Generic;
use calloop::{EventLoop, Interest, Mode, PostAction};
use log::{debug, error, info, warn};

use crate::assets::AssetLoader;
use crate::config::FluxConfig;
use crate::error::PresentError;
use crate::input::InputSource;
use crate::ipc::IpcServer;
use crate::protocol::{DispatchTarget, Reply, Request};
use crate::renderer::{Renderer, Resources};
use crate::scene::{FrameContext, Scene, Window, WindowId};
use crate::present::{DisplayDevice, PresentState, Presenter};
use crate::shell::Shell;

/// Which descriptors woke the loop during the last dispatch.
#[derive(Debug, Default, Clone, Copy)]
struct Readiness {
    display: bool,
    input: bool,
}

/// Result of one loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// A frame was rendered and handed to the display.
    Presented,
    /// A flip is still outstanding; nothing was rendered.
    FlipPending,
    /// The keep-running flag was cleared.
    Stopped,
}

pub struct Compositor<D: DisplayDevice> {
    presenter: Presenter<D>,
    renderer: Renderer,
    scene: Scene,
    resources: Resources,
    assets: Box<dyn AssetLoader>,
    shell: Shell,
    ipc: Option<IpcServer>,
    input: Option<Box<dyn InputSource>>,
    focus: Option<WindowId>,

    event_loop: EventLoop<'static, Readiness>,
    keep_running: Arc<AtomicBool>,
    frame_interval: Duration,
    flip_retries: u32,
    flip_failures: u32,
    last_frame: Instant,
}

impl<D: DisplayDevice> Compositor<D> {
    /// Configure the display and build the scene and shell at its resolution.
    pub fn new(device: D, config: &FluxConfig, assets: Box<dyn AssetLoader>) -> Result<Self> {
        info!("Initializing Flux compositor...");

        let display_fd = dup(device.event_fd()).context("Failed to duplicate display fd")?;
        let mut presenter = Presenter::new(device, config.display.present_options());
        presenter
            .configure()
            .context("Failed to configure presentation engine")?;
        let screen = presenter.mode();

        let renderer =
            Renderer::new(screen.0, screen.1).context("Failed to allocate screen frame")?;
        let scene = Scene::new(screen, config.scene);
        let mut resources = Resources::new();
        let shell = Shell::new(
            screen,
            config.scene,
            &config.shell,
            &mut resources,
            assets.as_ref(),
        )
        .context("Failed to build shell windows")?;

        let event_loop: EventLoop<'static, Readiness> =
            EventLoop::try_new().context("create calloop")?;
        event_loop
            .handle()
            .insert_source(
                Generic::new(display_fd, Interest::READ, Mode::Level),
                |_, _, ready: &mut Readiness| {
                    ready.display = true;
                    Ok(PostAction::Continue)
                },
            )
            .map_err(|_| anyhow::anyhow!("register display FD"))?;

        info!("Compositor ready at {}x{}", screen.0, screen.1);
        Ok(Self {
            presenter,
            renderer,
            scene,
            resources,
            assets,
            shell,
            ipc: None,
            input: None,
            focus: None,
            event_loop,
            keep_running: Arc::new(AtomicBool::new(true)),
            frame_interval: config.display.frame_interval(),
            flip_retries: config.display.flip_retries,
            flip_failures: 0,
            last_frame: Instant::now(),
        })
    }

    /// Serve clients on `server`.
    pub fn with_ipc(mut self, server: IpcServer) -> Self {
        self.ipc = Some(server);
        self
    }

    /// Take input from `source`. Its descriptor joins the event loop.
    pub fn with_input(mut self, source: Box<dyn InputSource>) -> Result<Self> {
        let fd = dup(source.poll_fd()).context("Failed to duplicate input fd")?;
        self.event_loop
            .handle()
            .insert_source(
                Generic::new(fd, Interest::READ, Mode::Level),
                |_, _, ready: &mut Readiness| {
                    ready.input = true;
                    Ok(PostAction::Continue)
                },
            )
            .map_err(|_| anyhow::anyhow!("register input FD"))?;
        self.input = Some(source);
        Ok(self)
    }

    /// Share a stop flag created before the compositor, typically one a
    /// signal handler already clears.
    pub fn with_keep_running(mut self, flag: Arc<AtomicBool>) -> Self {
        self.keep_running = flag;
        self
    }

    /// Flag that stops the loop when cleared. Hand it to signal handlers.
    pub fn keep_running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.keep_running)
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    pub fn shell(&self) -> &Shell {
        &self.shell
    }

    pub fn shell_mut(&mut self) -> &mut Shell {
        &mut self.shell
    }

    pub fn presenter(&self) -> &Presenter<D> {
        &self.presenter
    }

    pub fn presenter_mut(&mut self) -> &mut Presenter<D> {
        &mut self.presenter
    }

    pub fn ipc(&self) -> Option<&IpcServer> {
        self.ipc.as_ref()
    }

    pub fn focus(&self) -> Option<WindowId> {
        self.focus
    }

    /// The last composited frame.
    pub fn frame(&self) -> &tiny_skia::Pixmap {
        self.renderer.frame()
    }

    /// Apply one request as if it had arrived on the socket.
    pub fn handle_request(&mut self, request: &Request) -> Reply {
        DispatchTarget {
            scene: &mut self.scene,
            resources: &mut self.resources,
            assets: self.assets.as_ref(),
            focus: &mut self.focus,
        }
        .dispatch(request)
    }

    /// Run ticks until the keep-running flag is cleared or a frame-fatal
    /// error occurs, then tear everything down.
    pub fn run(&mut self) -> Result<()> {
        info!("Starting compositor main loop");
        let mut outcome = Ok(());
        while self.keep_running.load(Ordering::SeqCst) {
            match self.tick() {
                Ok(Tick::Stopped) => break,
                Ok(_) => {}
                Err(e) => {
                    error!("Stopping main loop: {:#}", e);
                    outcome = Err(e);
                    break;
                }
            }
        }

        if let Err(e) = self.shutdown() {
            error!("Teardown failed: {}", e);
            outcome = outcome.and(Err(e.into()));
        }
        outcome
    }

    /// One iteration of the event loop.
    pub fn tick(&mut self) -> Result<Tick> {
        let mut ready = Readiness::default();
        self.event_loop
            .dispatch(Some(self.frame_interval), &mut ready)
            .context("event loop dispatch failed")?;

        if ready.display {
            self.presenter
                .dispatch_events()
                .context("reading display events")?;
        }
        if ready.input {
            self.pump_input();
        }
        self.serve_clients();

        if !self.keep_running.load(Ordering::SeqCst) {
            return Ok(Tick::Stopped);
        }

        if self.presenter.flip_pending() {
            match self.retry_flip()? {
                Tick::Presented => {}
                other => return Ok(other),
            }
        }

        self.render_frame()
    }

    fn pump_input(&mut self) {
        let Some(source) = self.input.as_mut() else {
            return;
        };
        match source.drain() {
            Ok(events) => {
                for event in &events {
                    self.shell.handle_input(event);
                }
            }
            Err(e) => warn!("input: {}", e),
        }
    }

    fn serve_clients(&mut self) {
        let Some(ipc) = self.ipc.as_mut() else {
            return;
        };
        ipc.accept();

        let mut target = DispatchTarget {
            scene: &mut self.scene,
            resources: &mut self.resources,
            assets: self.assets.as_ref(),
            focus: &mut self.focus,
        };
        let served = ipc.poll(|request| target.dispatch(request));
        if served > 0 {
            debug!("served {} requests", served);
        }
    }

    /// Wait again for a flip that timed out on an earlier tick. Gives up
    /// after the configured number of retries.
    fn retry_flip(&mut self) -> Result<Tick> {
        match self.presenter.wait_for_flip(&self.keep_running) {
            Ok(()) => {
                info!("late page flip completed after {} retries", self.flip_failures);
                self.flip_failures = 0;
                Ok(Tick::Presented)
            }
            Err(PresentError::Cancelled) => Ok(Tick::Stopped),
            Err(e @ PresentError::FlipTimeout { .. }) => self.flip_timed_out(e),
            Err(e) => Err(e).context("waiting for page flip"),
        }
    }

    fn flip_timed_out(&mut self, e: PresentError) -> Result<Tick> {
        self.flip_failures += 1;
        if self.flip_failures > self.flip_retries {
            return Err(e).context(format!(
                "page flip still pending after {} retries",
                self.flip_retries
            ));
        }
        warn!(
            "{} (retry {}/{})",
            e, self.flip_failures, self.flip_retries
        );
        Ok(Tick::FlipPending)
    }

    /// Paint and present the focused (or home) window, the menu overlay
    /// and the cursor, in that order.
    fn render_frame(&mut self) -> Result<Tick> {
        let now = Instant::now();
        let dt = now.duration_since(self.last_frame);
        self.last_frame = now;

        let ctx = FrameContext {
            dt,
            screen: self.scene.screen_size(),
            text: &self.resources,
        };

        self.renderer.begin_frame();

        let focused = self
            .focus
            .and_then(|id| self.scene.window_mut(id))
            .filter(|w| w.is_visible());
        let base = match focused {
            Some(window) => window,
            None => self.shell.home_mut(),
        };
        draw(base, &mut self.renderer, &self.resources, &ctx);

        if self.shell.menu_open() {
            draw(self.shell.menu_mut(), &mut self.renderer, &self.resources, &ctx);
        }
        if self.shell.cursor().is_visible() {
            draw(self.shell.cursor_mut(), &mut self.renderer, &self.resources, &ctx);
        }

        match self.presenter.present(self.renderer.frame(), &self.keep_running) {
            Ok(_) => {
                self.flip_failures = 0;
                Ok(Tick::Presented)
            }
            Err(PresentError::Cancelled) => Ok(Tick::Stopped),
            Err(e @ PresentError::FlipTimeout { .. }) => self.flip_timed_out(e),
            Err(e) => Err(e).context("presenting frame"),
        }
    }

    /// Restore the display, release buffers and close the control socket.
    /// Safe to call more than once.
    pub fn shutdown(&mut self) -> Result<(), PresentError> {
        if self.presenter.state() == PresentState::Shutdown && self.ipc.is_none() {
            return Ok(());
        }
        info!("Shutting down compositor...");
        self.keep_running.store(false, Ordering::SeqCst);
        let result = self.presenter.shutdown();
        // Dropping the server closes clients and unlinks the socket.
        self.ipc = None;
        self.input = None;
        result
    }
}

fn dup(fd: std::os::fd::BorrowedFd<'_>) -> std::io::Result<OwnedFd> {
    fd.try_clone_to_owned()
}

/// Run the window's frame hook, repaint it and composite it onto the frame.
fn draw(window: &mut Window, renderer: &mut Renderer, resources: &Resources, ctx: &FrameContext<'_>) {
    window.run_frame_hook(ctx);
    renderer.paint_window(window, resources);
    renderer.compose(window);
}

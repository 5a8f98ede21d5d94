//! A simple, high-level GUI for showing images.
//!
//! Windows are created on demand by [`show_image`] and identified by a string key, which is also
//! used as the window title. Input events are forwarded to the application and can be retrieved
//! with [`poll_event`].
//!
//! Most platforms require windows to be driven from the main thread, so [`run`] takes over the
//! main thread and runs the application on a secondary one.

mod renderer;

use std::{
    collections::{HashMap, HashSet},
    panic::{catch_unwind, AssertUnwindSafe},
    process,
    rc::Rc,
    sync::{
        mpsc::{self, Receiver, Sender},
        Mutex, OnceLock,
    },
};

use anyhow::anyhow;
use winit::{
    event::{ElementState, Event, KeyboardInput, VirtualKeyCode, WindowEvent},
    event_loop::{ControlFlow, EventLoop, EventLoopBuilder, EventLoopProxy, EventLoopWindowTarget},
    window::{Fullscreen, WindowId},
};

use crate::{
    image::{Image, Resolution},
    termination::Termination,
};

use self::renderer::{Gpu, Renderer, Window};

/// A key on the keyboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Escape,
    Other(VirtualKeyCode),
}

impl Key {
    fn pressed(state: ElementState, code: Option<VirtualKeyCode>) -> Option<Self> {
        match (state, code) {
            (ElementState::Pressed, Some(VirtualKeyCode::Escape)) => Some(Key::Escape),
            (ElementState::Pressed, Some(code)) => Some(Key::Other(code)),
            _ => None,
        }
    }
}

/// User input received by one of the windows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuiEvent {
    /// A key was pressed while the window identified by `window` had focus.
    KeyPressed { window: String, key: Key },
    /// The user asked to close the window identified by `window`.
    ///
    /// The window stays open; it's up to the application to react.
    CloseRequested { window: String },
}

struct Gui {
    gpu: Rc<Gpu>,
    windows: HashMap<String, Renderer>,
    win_id_to_key: HashMap<WindowId, String>,
    fullscreen: HashSet<String>,
    events: Sender<GuiEvent>,
}

impl Gui {
    fn new(events: Sender<GuiEvent>) -> anyhow::Result<Self> {
        Ok(Self {
            gpu: Rc::new(pollster::block_on(Gpu::open())?),
            windows: HashMap::new(),
            win_id_to_key: HashMap::new(),
            fullscreen: HashSet::new(),
            events,
        })
    }

    fn renderer_mut(&mut self, win: WindowId) -> Option<&mut Renderer> {
        let key = self.win_id_to_key.get(&win)?;
        self.windows.get_mut(key)
    }

    fn forward(&self, event: GuiEvent) {
        // The application may have stopped listening, that's fine.
        self.events.send(event).ok();
    }

    fn run(mut self, event_loop: EventLoop<Msg>) -> ! {
        event_loop.run(move |event, target, flow| {
            *flow = ControlFlow::Wait;
            match event {
                Event::UserEvent(msg) => {
                    if let Err(e) = self.handle_msg(msg, target) {
                        log::error!("{e:#}");
                        *flow = ControlFlow::ExitWithCode(1);
                    }
                }
                Event::WindowEvent { window_id, event } => {
                    self.handle_window_event(window_id, event);
                }
                Event::RedrawRequested(window_id) => {
                    if let Some(renderer) = self.renderer_mut(window_id) {
                        if let Err(e) = renderer.redraw() {
                            log::error!("{e:#}");
                        }
                    }
                }
                _ => {}
            }
        });
    }

    fn handle_msg(&mut self, msg: Msg, target: &EventLoopWindowTarget<Msg>) -> anyhow::Result<()> {
        match msg {
            Msg::Image { key, res, data } => {
                if !self.windows.contains_key(&key) {
                    log::debug!("creating window for image '{key}' at {res}");
                    let win = Window::open(target, &key, res)?;
                    let win_id = win.win.id();
                    let renderer = Renderer::new(win, self.gpu.clone())?;
                    self.win_id_to_key.insert(win_id, key.clone());
                    set_fullscreen_mode(renderer.window(), self.fullscreen.contains(&key));
                    self.windows.insert(key.clone(), renderer);
                }

                if let Some(renderer) = self.windows.get_mut(&key) {
                    renderer.update_texture(res, &data);
                    renderer.window().request_redraw();
                }
            }
            Msg::Fullscreen { key, fullscreen } => {
                if fullscreen {
                    self.fullscreen.insert(key.clone());
                } else {
                    self.fullscreen.remove(&key);
                }
                if let Some(renderer) = self.windows.get(&key) {
                    set_fullscreen_mode(renderer.window(), fullscreen);
                }
            }
        }
        Ok(())
    }

    fn handle_window_event(&mut self, window_id: WindowId, event: WindowEvent<'_>) {
        let Some(key) = self.win_id_to_key.get(&window_id).cloned() else {
            return;
        };
        match event {
            WindowEvent::Resized(_) | WindowEvent::ScaleFactorChanged { .. } => {
                if let Some(renderer) = self.renderer_mut(window_id) {
                    renderer.resize();
                    renderer.window().request_redraw();
                }
            }
            WindowEvent::KeyboardInput {
                input:
                    KeyboardInput {
                        state,
                        virtual_keycode,
                        ..
                    },
                ..
            } => {
                if let Some(k) = Key::pressed(state, virtual_keycode) {
                    self.forward(GuiEvent::KeyPressed { window: key, key: k });
                }
            }
            WindowEvent::CloseRequested => {
                self.forward(GuiEvent::CloseRequested { window: key });
            }
            _ => {}
        }
    }
}

fn set_fullscreen_mode(window: &winit::window::Window, fullscreen: bool) {
    window.set_fullscreen(fullscreen.then_some(Fullscreen::Borderless(None)));
}

#[derive(Debug)]
enum Msg {
    Image {
        key: String,
        res: Resolution,
        data: Vec<u8>,
    },
    Fullscreen {
        key: String,
        fullscreen: bool,
    },
}

/// Connection between the application thread and the GUI thread.
struct Display {
    proxy: Mutex<EventLoopProxy<Msg>>,
    events: Mutex<Receiver<GuiEvent>>,
}

static DISPLAY: OnceLock<Display> = OnceLock::new();

fn display() -> anyhow::Result<&'static Display> {
    DISPLAY
        .get()
        .ok_or_else(|| anyhow!("GUI is not running (`gui::run` was not called)"))
}

fn send(msg: Msg) -> anyhow::Result<()> {
    display()?
        .proxy
        .lock()
        .unwrap()
        .send_event(msg)
        .map_err(|_closed| anyhow!("GUI event loop has shut down"))
}

/// Runs `app` on a background thread while the calling thread drives the GUI.
///
/// Must be called from the main thread, at most once. The process exits when `app` returns, with
/// an exit code derived from its return value (or 101 if it panics).
pub fn run<F, R>(app: F) -> !
where
    F: FnOnce() -> R + Send + 'static,
    R: Termination + Send,
{
    let event_loop = EventLoopBuilder::with_user_event().build();
    let (sender, receiver) = mpsc::channel();
    let display = Display {
        proxy: Mutex::new(event_loop.create_proxy()),
        events: Mutex::new(receiver),
    };
    if DISPLAY.set(display).is_err() {
        log::error!("`gui::run` called more than once");
        process::exit(1);
    }

    std::thread::spawn(move || match catch_unwind(AssertUnwindSafe(app)) {
        Ok(r) => {
            if r.is_success() {
                process::exit(0);
            } else {
                // Prints the error, if any.
                r.report();
                process::exit(1);
            }
        }
        // The panic hook has already printed the message. 101 matches libstd.
        Err(_payload) => process::exit(101),
    });

    match Gui::new(sender) {
        Ok(gui) => gui.run(event_loop),
        Err(e) => {
            log::error!("failed to initialize GUI: {e:#}");
            process::exit(1);
        }
    }
}

/// Displays an image in the window identified by `key`, creating the window if necessary.
pub fn show_image(key: impl Into<String>, image: &Image) -> anyhow::Result<()> {
    // Image data is RGBA8 internally, which is also the texture format.
    send(Msg::Image {
        key: key.into(),
        res: image.resolution(),
        data: image.data().to_vec(),
    })
}

/// Switches the window identified by `key` to borderless fullscreen, or back.
///
/// This may be called before the window has been created by [`show_image`].
pub fn set_fullscreen(key: impl Into<String>, fullscreen: bool) -> anyhow::Result<()> {
    send(Msg::Fullscreen {
        key: key.into(),
        fullscreen,
    })
}

/// Returns the next pending input event without blocking.
pub fn poll_event() -> anyhow::Result<Option<GuiEvent>> {
    match display()?.events.lock().unwrap().try_recv() {
        Ok(event) => Ok(Some(event)),
        Err(mpsc::TryRecvError::Empty) => Ok(None),
        Err(mpsc::TryRecvError::Disconnected) => Err(anyhow!("GUI event loop has shut down")),
    }
}

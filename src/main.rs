//! Shows the webcam feed with hand landmarks drawn on top, and prints the position of one landmark
//! of the first hand for every frame.
//!
//! Press Escape or close the window to exit. See the library documentation for the environment
//! variables that configure this program.

use handtrack::config::Config;
use handtrack::gui::{self, GuiEvent, Key};
use handtrack::hand::{HandDetector, HandDetectorOptions};
use handtrack::image::Resolution;
use handtrack::timer::FpsCounter;
use handtrack::video::webcam::{Webcam, WebcamOptions};

const WINDOW: &str = "Hand Detection";

fn main() {
    handtrack::init_logger!();
    gui::run(run);
}

fn run() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    log::debug!("{config:?}");
    config.jpeg_backend.install()?;

    let mut options = WebcamOptions::default()
        .resolution(Resolution::RES_720P)
        .fps(30);
    if let Some(name) = &config.webcam_name {
        options = options.name(name);
    }
    let mut webcam = Webcam::open(options)?;

    let mut detector = HandDetector::new(
        HandDetectorOptions::default()
            .model_dir(config.model_dir.clone())
            .model_complexity(config.model_complexity),
    )?;

    gui::set_fullscreen(WINDOW, config.fullscreen)?;

    let mut fps = FpsCounter::new("handtrack");
    loop {
        let mut frame = webcam.read()?;
        detector.find_hands(&mut frame, true)?;
        let positions = detector.find_position(&mut frame, 0, true)?;
        if let Some(pos) = positions.get(config.landmark) {
            println!("{pos}");
        }
        gui::show_image(WINDOW, &frame)?;

        if exit_requested()? {
            break;
        }
        fps.tick_with(webcam.timers().chain(detector.source().timers()));
    }

    log::info!("exiting");
    Ok(())
}

/// Drains pending GUI events, returning `true` if the user asked to quit.
fn exit_requested() -> anyhow::Result<bool> {
    let mut exit = false;
    while let Some(event) = gui::poll_event()? {
        match event {
            GuiEvent::KeyPressed {
                key: Key::Escape, ..
            }
            | GuiEvent::CloseRequested { .. } => exit = true,
            GuiEvent::KeyPressed { .. } => {}
        }
    }
    Ok(exit)
}

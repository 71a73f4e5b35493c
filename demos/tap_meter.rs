//! Microphone level meter
//!
//! Captures the default (or named) input device, routes it through a gain and a
//! tap to the default output, and prints the tap's peak level.
//!
//! Run with: cargo run --example tap_meter --features cpal_io [-- "device name"]

use std::thread::sleep;
use std::time::Duration;

use lauscher::nodes::Gain;
use lauscher::{CpalInput, CpalOutput, GraphConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let (mut patchbay, graph) = lauscher::new(GraphConfig::default())?;

    let (input, capture) = patchbay.add_input(2)?;
    let gain = patchbay.add_unit(Gain::new(0.8))?;
    let tap = patchbay.add_tap(2)?;
    patchbay.connect(input, gain.id(), 0, 0)?;
    patchbay.connect(gain.id(), tap.id(), 0, 0)?;
    patchbay.set_name(tap.id(), "meter")?;

    let mut mic = CpalInput::new(capture, patchbay.sample_rate());
    for device in mic.list_devices()? {
        println!("input: {} ({})", device.name, device.id);
    }
    if let Some(name) = std::env::args().nth(1) {
        mic.set_device(&name)?;
    }
    mic.configure_input_device()?;
    mic.start()?;

    let _speakers = CpalOutput::start(None, graph, tap.id())?;
    tap.set_buffer_depth(4800)?;

    println!("Metering... Ctrl+C to stop");
    loop {
        sleep(Duration::from_millis(100));
        patchbay.collect_garbage();

        let peaks: Vec<f32> = (0..tap.channel_count())
            .map(|ch| {
                tap.get_samples(ch)
                    .iter()
                    .fold(0.0f32, |peak, s| peak.max(s.abs()))
            })
            .collect();
        let bars: Vec<String> = peaks
            .iter()
            .map(|peak| "#".repeat((peak * 40.0) as usize))
            .collect();
        println!("{:<40} | {:<40}", bars[0], bars.get(1).map_or("", String::as_str));
    }
}

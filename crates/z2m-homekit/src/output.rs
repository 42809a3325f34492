//! Output rendering for the inspection commands.

use std::io::{self, Write};

use tabled::settings::Style;
use tabled::{Table, Tabled};

use z2m_homekit_core::{Device, Features};

use crate::cli::OutputFormat;

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Topic")]
    topic: String,
    #[tabled(rename = "Type")]
    device_type: String,
    #[tabled(rename = "HomeKit")]
    homekit: &'static str,
    #[tabled(rename = "Web")]
    web: &'static str,
    #[tabled(rename = "Features")]
    features: String,
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

fn feature_list(features: &Features) -> String {
    let flags = [
        ("temperature", features.temperature),
        ("humidity", features.humidity),
        ("battery", features.battery),
        ("occupancy", features.occupancy),
        ("illuminance", features.illuminance),
        ("pressure", features.pressure),
        ("contact", features.contact),
        ("water_leak", features.water_leak),
        ("smoke", features.smoke),
        ("tamper", features.tamper),
        ("brightness", features.brightness),
        ("color", features.color),
        ("color_temperature", features.color_temperature),
        ("speed", features.speed),
        ("direction", features.direction),
        ("swing", features.swing),
    ];
    let names: Vec<&str> = flags
        .iter()
        .filter(|(_, on)| *on)
        .map(|(name, _)| *name)
        .collect();
    if names.is_empty() {
        "-".into()
    } else {
        names.join(", ")
    }
}

impl From<&Device> for DeviceRow {
    fn from(d: &Device) -> Self {
        Self {
            id: d.id.clone(),
            name: d.name.clone(),
            topic: d.topic.clone(),
            device_type: d.device_type.to_string(),
            homekit: yes_no(d.homekit),
            web: yes_no(d.web),
            features: feature_list(&d.features),
        }
    }
}

/// Render the device list in the chosen format.
pub fn render_devices<'a>(
    format: OutputFormat,
    devices: impl IntoIterator<Item = &'a Device>,
) -> Result<String, serde_json::Error> {
    let devices: Vec<&Device> = devices.into_iter().collect();
    match format {
        OutputFormat::Table => {
            let rows: Vec<DeviceRow> = devices.iter().copied().map(DeviceRow::from).collect();
            Ok(Table::new(rows).with(Style::rounded()).to_string())
        }
        OutputFormat::Json => serde_json::to_string_pretty(&devices),
    }
}

pub fn print_output(output: &str) {
    if output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}

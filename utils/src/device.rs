use cpal::Device;
use cpal::traits::{DeviceTrait, HostTrait};

fn get_host() -> cpal::Host {
    cpal::default_host()
}

pub fn get_or_default_input(device_name: Option<String>) -> anyhow::Result<Device> {
    let host = get_host();
    tracing::debug!("Host: {:?}", host.id());
    match device_name {
        None => host
            .default_input_device()
            .ok_or_else(|| anyhow::anyhow!("No default input device")),
        Some(target) => host
            .input_devices()?
            .find(|d| d.name().is_ok_and(|name| name == target))
            .ok_or_else(|| anyhow::anyhow!("No input device named {}", target)),
    }
}

pub fn get_or_default_output(device_name: Option<String>) -> anyhow::Result<Device> {
    let host = get_host();
    match device_name {
        None => host
            .default_output_device()
            .ok_or_else(|| anyhow::anyhow!("No default output device")),
        Some(target) => host
            .output_devices()?
            .find(|d| d.name().is_ok_and(|name| name == target))
            .ok_or_else(|| anyhow::anyhow!("No output device named {}", target)),
    }
}

fn describe<I>(devices: I, default_name: Option<String>, input: bool) -> String
where
    I: Iterator<Item = Device>,
{
    let mut device_names: Vec<String> = Vec::new();
    for device in devices {
        let Ok(d_name) = device.name() else {
            continue;
        };
        let d_cfg = if input {
            device.default_input_config()
        } else {
            device.default_output_config()
        };
        let mut d = match d_cfg {
            Ok(cfg) => format!(" * {}({}ch, {}hz)", d_name, cfg.channels(), cfg.sample_rate().0),
            Err(_) => format!(" * {}", d_name),
        };
        if default_name.as_deref() == Some(d_name.as_str()) {
            d.push_str(" [default]");
        }
        device_names.push(d);
    }
    device_names.join("\n")
}

pub fn get_available_inputs() -> anyhow::Result<String> {
    for host in cpal::available_hosts() {
        tracing::debug!("Available host: {:?}", host);
    }

    let host = get_host();
    let default_device = host.default_input_device().and_then(|d| d.name().ok());
    Ok(describe(host.input_devices()?, default_device, true))
}

pub fn get_available_outputs() -> anyhow::Result<String> {
    let host = get_host();
    let default_device = host.default_output_device().and_then(|d| d.name().ok());
    Ok(describe(host.output_devices()?, default_device, false))
}

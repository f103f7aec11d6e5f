//! Remote paths and shell scripts run on a provider.

use crate::config::OutputFormat;

pub const REMOTE_RESOURCES: &str = "/golem/resources";
pub const REMOTE_ARCHIVE: &str = "/golem/resources/archive.zip";
pub const REMOTE_OUTPUT: &str = "/golem/output";

/// Display number the virtual X server listens on.
const DISPLAY: &str = ":1";

pub fn clear_output() -> String {
    format!("(rm -rf {REMOTE_OUTPUT}/*) || true")
}

pub fn unpack_archive() -> String {
    format!("unzip -o {REMOTE_ARCHIVE} -d {REMOTE_RESOURCES}/")
}

/// Binds a headless X server to the provider's GPU.
pub fn virtual_display() -> String {
    format!(
        "PCIID=$(nvidia-xconfig --query-gpu-info | grep 'PCI BusID' | awk -F'PCI BusID : ' '{{print $2}}') \
         && (nvidia-xconfig --busid=$PCIID --use-display-device=none --virtual=1280x1024 || true) \
         && ((Xorg {DISPLAY} &) || true) && sleep 5"
    )
}

/// Preparation scripts, in order.
pub fn prepare() -> [String; 3] {
    [clear_output(), unpack_archive(), virtual_display()]
}

/// Renders one frame. The exit status is deliberately swallowed.
pub fn render(scene: &str, format: OutputFormat, frame: u32) -> String {
    format!(
        "(DISPLAY={DISPLAY} blender -b {REMOTE_RESOURCES}/{scene}.blend -o {REMOTE_OUTPUT}/ \
         -noaudio -F {format} -f {frame} -- --cycles-device CUDA) || true"
    )
}

/// File name of a rendered frame: zero-padded to four digits.
pub fn frame_file_name(frame: u32, format: OutputFormat) -> String {
    format!("{frame:04}.{}", format.extension())
}

pub fn remote_frame_path(frame: u32, format: OutputFormat) -> String {
    format!("{REMOTE_OUTPUT}/{}", frame_file_name(frame, format))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_names_are_zero_padded() {
        assert_eq!(frame_file_name(7, OutputFormat::Png), "0007.png");
        assert_eq!(frame_file_name(12345, OutputFormat::Jpeg), "12345.jpeg");
        assert_eq!(
            remote_frame_path(42, OutputFormat::OpenExrMultilayer),
            "/golem/output/0042.exr"
        );
    }

    #[test]
    fn render_script_targets_scene_frame_and_format() {
        let script = render("shot_010", OutputFormat::OpenExr, 25);
        assert!(script.starts_with("(DISPLAY=:1 blender -b /golem/resources/shot_010.blend"));
        assert!(script.contains("-F OPEN_EXR -f 25"));
        assert!(script.contains("--cycles-device CUDA"));
        assert!(script.ends_with("|| true"));
    }

    #[test]
    fn prepare_clears_unpacks_then_starts_display() {
        let [clear, unpack, display] = prepare();
        assert_eq!(clear, "(rm -rf /golem/output/*) || true");
        assert_eq!(
            unpack,
            "unzip -o /golem/resources/archive.zip -d /golem/resources/"
        );
        assert!(display.contains("{print $2}"));
        assert!(display.contains("Xorg :1"));
    }
}

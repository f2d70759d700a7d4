pub mod url;
pub mod youtube;

pub use url::{extract_video_id, VideoReference};
pub use youtube::{select_audio_stream, AudioStream, VideoMetadata, VideoPlatform, YtDlpClient};

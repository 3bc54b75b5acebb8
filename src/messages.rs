//! User-facing reply texts

/// Prefix of the reply sent when a job fails for good
pub const GENERATION_FAILED: &str = "イラストの生成に失敗しました";

/// Reply when the queue cannot take another job
pub const QUEUE_FULL: &str = "現在処理中のため、しばらく待ってから再度お試しください。";

/// Reply when img2img is requested outside a thread with an image
pub const MISSING_SOURCE_IMAGE: &str = "元画像のURLが取得できません。スレッド内で実行してください。";

/// Prefix of the reply for unexpected command errors
pub const COMMAND_ERROR: &str = "エラーが発生しました";

pub fn generation_failed(error: impl std::fmt::Display) -> String {
    format!("{}: {}", GENERATION_FAILED, error)
}

pub fn command_error(error: impl std::fmt::Display) -> String {
    format!("{}: {}", COMMAND_ERROR, error)
}

pub fn queue_length(length: usize) -> String {
    format!("現在のイラスト生成キューの長さは {} です。", length)
}

pub fn hokusai_prompt(subject: &str) -> String {
    format!("葛飾北斎が描いた浮世絵版「{}」", subject)
}

pub mod tracing;

use anyhow::Result;

/// トレーシング初期化のハンドル。
///
/// レジストリ構築時に一度だけ生成され、以後すべてのコンポーネントが
/// 構造化ログを出力できる状態を保証する。
#[derive(Debug, Clone)]
pub struct Telemetry;

impl Telemetry {
    /// 新しいTelemetryインスタンスを作成し、トレーシングを初期化する。
    ///
    /// # Errors
    /// サブスクライバの初期化に失敗した場合はエラーを返す。
    pub fn new() -> Result<Self> {
        tracing::init()?;
        Ok(Self)
    }
}

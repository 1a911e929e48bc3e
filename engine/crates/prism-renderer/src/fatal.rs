/// 不可恢复的错误：打印完整的错误链后终止进程
///
/// 初始化失败以及每帧录制 / 提交失败都走这里
pub fn fatal(err: anyhow::Error) -> ! {
    log::error!("fatal error: {err}");
    for (depth, cause) in err.chain().skip(1).enumerate() {
        log::error!("  {depth}: {cause}");
    }
    log::logger().flush();
    std::process::abort()
}

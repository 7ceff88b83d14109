use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "superbundle", version, about = "超大交易缓冲上传 + Jito bundle 提交工具")]
pub struct Cli {
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "配置文件路径（默认查找 superbundle.yaml 或 config/superbundle.yaml）"
    )]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// 上传消息并以 bundle 提交，失败时按配置重试
    Submit(SubmitArgs),
    /// 组装 bundle 并仅在 relay 侧模拟
    Simulate(RequestArgs),
    /// 对已创建的消息记录单独发送 execute 交易
    Execute(SlotArgs),
    /// 关闭缓冲区账户并回收租金
    #[command(name = "close-buffer")]
    CloseBuffer(SlotArgs),
    /// 关闭消息记录账户并回收租金
    #[command(name = "close-record")]
    CloseRecord(SlotArgs),
    /// 查看某个槽位上的缓冲区与记录状态
    Inspect(SlotArgs),
}

#[derive(Args, Debug)]
pub struct RequestArgs {
    #[arg(long, value_name = "FILE", help = "包含指令列表的 JSON 文件")]
    pub request: PathBuf,
}

#[derive(Args, Debug)]
pub struct SubmitArgs {
    #[command(flatten)]
    pub request: RequestArgs,
    #[arg(long, help = "覆盖配置中的起始槽位")]
    pub slot: Option<u8>,
    #[arg(long, help = "覆盖配置中的最大尝试次数")]
    pub max_attempts: Option<u32>,
    #[arg(long, help = "跳过提交前的 bundle 模拟")]
    pub skip_simulation: bool,
    #[arg(long, help = "只组装并打印交易，不发送")]
    pub dry_run: bool,
}

#[derive(Args, Debug)]
pub struct SlotArgs {
    #[arg(long, help = "缓冲区 / 记录槽位（0-255）")]
    pub slot: u8,
}

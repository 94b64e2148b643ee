//! clawdbot-relay 主入口

use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{error, info};

use clawdbot_relay::channels::feishu::{
    ConfiguredIdentityProbe, FeishuMonitor, ForwardGuard, IdentityRegistry, MentionForwarder,
};
use clawdbot_relay::core::message::types::ChatType;
use clawdbot_relay::core::message::LoggingPipeline;
use clawdbot_relay::core::routing::BindingRouter;
use clawdbot_relay::infra::config::{Config, ConfigLoader};
use clawdbot_relay::infra::logging::{self, LoggingConfig};

// 命令行参数解析结构体
#[derive(Parser, Debug)]
#[command(name = "clawdbot-relay")]
#[command(version)]
#[command(about = "飞书多机器人 @提及转发", long_about = None)]
struct Args {
    /// 配置文件路径
    #[arg(short, long, default_value = "clawdbot.toml")]
    config: String,

    /// 是否启用 verbose 模式（显示 DEBUG 日志）
    #[arg(short, long)]
    verbose: bool,

    /// 子命令
    #[command(subcommand)]
    command: Commands,
}

// 子命令枚举
#[derive(Subcommand, Debug)]
enum Commands {
    /// 检查配置文件是否有效
    Check,
    /// 注册配置中的账号，模拟一次出站发送后的转发
    Simulate {
        /// 发送账号
        #[arg(long)]
        from: String,
        /// 会话 ID
        #[arg(long)]
        chat: String,
        /// 会话类型（group / direct）
        #[arg(long, default_value = "group")]
        chat_type: String,
        /// 消息文本
        text: String,
    },
    /// 显示版本信息
    Version,
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let args = Args::parse();

    if let Commands::Version = args.command {
        println!("clawdbot-relay v{}", env!("CARGO_PKG_VERSION"));
        return;
    }

    let config = match ConfigLoader::new().load(&args.config).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("加载配置失败: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = logging::init(&LoggingConfig::from_settings(&config.logging, args.verbose)) {
        eprintln!("初始化日志失败: {}", e);
    }

    match args.command {
        Commands::Check => check_config(&args.config, &config),
        Commands::Simulate {
            from,
            chat,
            chat_type,
            text,
        } => {
            if let Err(e) = simulate(config, &from, &chat, ChatType::from_feishu(&chat_type), &text).await {
                error!(error = %e, "模拟转发失败");
                std::process::exit(1);
            }
        }
        Commands::Version => {}
    }
}

// 检查配置文件是否有效
fn check_config(config_path: &str, config: &Config) {
    println!("验证配置文件: {}", config_path);

    match config.validate() {
        Ok(()) => {
            println!("配置验证成功!");
            println!("- 飞书账号: {}", config.channels.feishu.accounts.len());
            println!("- 路由绑定: {}", config.routing.bindings.len());
            println!(
                "- 转发: {}（最大深度 {}）",
                if config.forwarding.enabled { "启用" } else { "关闭" },
                config.forwarding.max_depth
            );
        }
        Err(e) => {
            println!("配置验证失败: {}", e);
            std::process::exit(1);
        }
    }
}

// 注册所有账号后执行一次转发，结果写入日志
async fn simulate(
    config: Config,
    from: &str,
    chat_id: &str,
    chat_type: ChatType,
    text: &str,
) -> clawdbot_relay::Result<()> {
    config.validate()?;
    let config = Arc::new(config);

    let registry = Arc::new(IdentityRegistry::new());
    let resolver = Arc::new(BindingRouter::from_config(&config.routing));
    let pipeline = Arc::new(LoggingPipeline::new());

    let monitor = FeishuMonitor::new(
        config.clone(),
        registry.clone(),
        Arc::new(ConfiguredIdentityProbe::new()),
        resolver.clone(),
        pipeline.clone(),
    );
    monitor.start_all().await?;

    let forwarder = MentionForwarder::new(
        registry,
        ForwardGuard::new(config.forwarding.max_depth),
        resolver,
        pipeline,
    );

    info!(from = %from, chat_id = %chat_id, chat_type = %chat_type, "开始模拟转发");
    match forwarder.spawn_forward(&config, text, chat_id, chat_type, from) {
        Some(handle) => {
            if let Err(e) = handle.await {
                error!(error = %e, "转发任务异常退出");
            }
        }
        None => info!("消息不需要转发"),
    }

    monitor.stop_all().await;
    Ok(())
}

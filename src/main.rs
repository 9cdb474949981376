use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use televault::{
    config::LogConfig, logging, uploader::ProgressCallback, AppConfig, ConfigSource, EngineError,
    FileId, FileSource, FolderId, NewFile, UploadProgress, VaultManager,
};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// TeleVault - 以 Telegram 频道为存储的分片文件仓库
#[derive(Parser)]
#[command(name = "televault")]
#[command(version, about, long_about = None)]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, default_value = "config/app.toml", env = "TELEVAULT_CONFIG")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 上传本地文件
    Upload {
        #[arg(value_name = "PATH")]
        path: PathBuf,

        /// 目标文件夹 ID
        #[arg(long)]
        folder: Option<FolderId>,

        /// 存储名称（默认使用本地文件名）
        #[arg(long)]
        name: Option<String>,
    },

    /// 下载文件到本地
    Download {
        file_id: FileId,

        #[arg(value_name = "OUT")]
        out: PathBuf,
    },

    /// 流式输出文件内容到标准输出
    Cat { file_id: FileId },

    /// 删除文件的远端分片和记录
    Delete {
        file_ids: Vec<FileId>,

        /// 同时删除该文件夹下的所有文件
        #[arg(long)]
        folder: Option<FolderId>,
    },

    /// 列出文件的分片元数据
    Chunks { file_id: FileId },
}

/// Ctrl-C 时取消
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("收到中断信号，当前批次完成后停止");
            cancel.cancel();
        }
    });
    token
}

/// 记录详细错误，向用户只返回通用提示
fn user_facing(e: EngineError) -> anyhow::Error {
    error!("{}", e);
    if let Some(file_id) = e.orphaned_file_id() {
        warn!(
            "文件 {} 的部分分片已上传，可执行 `televault delete {}` 清理",
            file_id, file_id
        );
    }
    anyhow::anyhow!(e.user_message())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = AppConfig::load_or_default(&cli.config).await;

    // 🔥 初始化日志系统（必须保持 _log_guard 存活）
    // 配置文件无效时使用默认日志配置
    let log_config = match &loaded {
        Ok((config, _)) => config.log.clone(),
        Err(_) => LogConfig::default(),
    };
    let _log_guard = logging::init_logging(&log_config);
    info!("TeleVault v{} 启动中...", env!("CARGO_PKG_VERSION"));

    let mut config = match loaded {
        Ok((config, ConfigSource::File)) => {
            info!("配置文件加载成功: {}", cli.config);
            config
        }
        Ok((config, ConfigSource::Default)) => {
            warn!("配置文件不存在，使用默认配置: {}", cli.config);
            if let Err(e) = config.save_to_file(&cli.config).await {
                error!("保存默认配置失败: {:#}", e);
            }
            config
        }
        Err(e) => {
            error!("配置文件加载失败: {:#}", e);
            return Err(e);
        }
    };
    config.apply_env_overrides();
    let (manager, store) = VaultManager::from_config(&config)?;

    match cli.command {
        Commands::Upload { path, folder, name } => {
            upload(&manager, path, folder, name).await?;
        }
        Commands::Download { file_id, out } => {
            let data = manager.download_file(file_id).await.map_err(user_facing)?;
            tokio::fs::write(&out, &data)
                .await
                .with_context(|| format!("写入文件失败: {:?}", out))?;
            info!("下载完成: {:?} ({} bytes)", out, data.len());
        }
        Commands::Cat { file_id } => {
            let cancel = cancel_on_ctrl_c();
            let mut stream = manager
                .download_file_stream(file_id)
                .await
                .map_err(user_facing)?;
            let mut stdout = tokio::io::stdout();

            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => None,
                    next = stream.next_chunk() => Some(next),
                };
                match next {
                    Some(Some(Ok(data))) => stdout.write_all(&data).await?,
                    Some(Some(Err(e))) => return Err(user_facing(e)),
                    Some(None) => break,
                    None => {
                        stream.close();
                        break;
                    }
                }
            }
            stdout.flush().await?;
        }
        Commands::Delete { mut file_ids, folder } => {
            if let Some(folder_id) = folder {
                file_ids.extend(store.list_file_ids_in_folder(Some(folder_id))?);
            }
            file_ids.sort_unstable();
            file_ids.dedup();

            for report in manager.delete_files_blobs(&file_ids).await {
                store.delete_file(report.file_id)?;
                info!(
                    "已删除文件 {}: 分片 {} 个, 远端清理失败 {} 个",
                    report.file_id, report.attempted, report.failed
                );
            }
        }
        Commands::Chunks { file_id } => {
            let file = store
                .get_file(file_id)?
                .with_context(|| format!("文件不存在: {}", file_id))?;
            println!("{} ({} bytes, 创建于 {})", file.name, file.size, file.created_at);

            for chunk in manager.list_chunks(file_id).await.map_err(user_facing)? {
                println!(
                    "#{:<4} {:>10} bytes  bot#{}  message={}  file={}",
                    chunk.chunk_index,
                    chunk.byte_size,
                    chunk.credential_index,
                    chunk.external_message_id,
                    chunk.external_file_id
                );
            }
        }
    }

    Ok(())
}

async fn upload(
    manager: &VaultManager,
    path: PathBuf,
    folder: Option<FolderId>,
    name: Option<String>,
) -> Result<()> {
    let source = FileSource::new(&path);
    let size = source.len().await?;
    let name = match name {
        Some(name) => name,
        None => path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .with_context(|| format!("无法从路径获取文件名: {:?}", path))?,
    };

    let on_progress: ProgressCallback = Arc::new(|p: UploadProgress| {
        info!(
            "上传进度: {}/{} 分片, {:.1}%, {:.2} MB/s",
            p.uploaded_chunks,
            p.total_chunks,
            p.percentage(),
            p.speed() as f64 / 1024.0 / 1024.0
        );
    });

    let file_id = manager
        .upload_file(
            Arc::new(source),
            NewFile::new(name, size).in_folder(folder),
            Some(on_progress),
            cancel_on_ctrl_c(),
        )
        .await
        .map_err(user_facing)?;

    println!("{}", file_id);
    Ok(())
}

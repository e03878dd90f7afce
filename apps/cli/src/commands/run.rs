//! run 命令
//!
//! 以固定周期运行分拣控制循环，Ctrl-C 或 `--duration-s` 到期后退出

use crate::setup::{self, Options};
use anyhow::{Context, Result, bail};
use clap::Args;
use crossbeam_channel::{Receiver, bounded};
use sorter_control::{
    CancellationToken, Collaborators, CoordinatorBuilder, DirectoryImageStore, ImageStore,
    PieceEvent, SimVisionConfig, sim_collaborators,
};
use sorter_driver::CommandSink;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{info, warn};

/// 事件队列长度
const EVENT_QUEUE: usize = 256;

#[derive(Args, Debug)]
pub struct RunCommand {
    /// 控制循环周期（毫秒）
    #[arg(long, default_value_t = 20)]
    pub tick_ms: u64,

    /// 运行指定秒数后退出
    #[arg(long)]
    pub duration_s: Option<u64>,

    /// 零件事件以 JSON 行输出到标准输出
    #[arg(long)]
    pub events: bool,

    /// 保存识别图像的目录
    #[arg(long)]
    pub images: Option<PathBuf>,

    /// 模拟视觉的随机种子
    #[arg(long)]
    pub seed: Option<u64>,
}

impl RunCommand {
    pub fn execute(&self, options: &Options) -> Result<()> {
        if self.tick_ms == 0 {
            bail!("--tick-ms must be positive");
        }
        let config = options.load_config()?;
        let bus = setup::open_bus(&config)?;
        let store = setup::open_store(&config)?;
        let profile = setup::load_profile(&config)?;

        let images: Option<Box<dyn ImageStore>> = match &self.images {
            Some(dir) => {
                fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create {}", dir.display()))?;
                Some(Box::new(DirectoryImageStore::new(dir)))
            },
            None => None,
        };
        let vision = SimVisionConfig {
            seed: self.seed,
            ..Default::default()
        };
        info!("Vision collaborators are simulated");

        let (events_tx, events_rx) = bounded(EVENT_QUEUE);
        let printer = spawn_event_printer(events_rx, self.events)?;

        let sink: Arc<dyn CommandSink> = bus.clone();
        let mut coordinator = CoordinatorBuilder::new(config, sink, store)
            .events(events_tx)
            .build(Collaborators {
                classification: sim_collaborators(vision, images),
                profile,
            })
            .context("Failed to initialise sorter")?;

        let stop = CancellationToken::new();
        {
            let stop = stop.clone();
            ctrlc::set_handler(move || {
                info!("Ctrl-C received, stopping");
                stop.cancel();
            })
            .context("Failed to install Ctrl-C handler")?;
        }
        if let Some(secs) = self.duration_s {
            let stop = stop.clone();
            thread::Builder::new()
                .name("run-timer".to_string())
                .spawn(move || {
                    thread::sleep(Duration::from_secs(secs));
                    stop.cancel();
                })
                .context("Failed to spawn run timer")?;
        }

        coordinator.run(Duration::from_millis(self.tick_ms), &stop);
        let status = coordinator.status();
        drop(coordinator);
        if printer.join().is_err() {
            warn!("Event printer thread panicked");
        }

        if !bus.flush(Duration::from_secs(2)) {
            warn!("Command queue not drained before shutdown");
        }
        let metrics = bus.metrics();
        info!(
            "Bus: submitted={}, written={}, completions={}, failures={}, timeouts={}",
            metrics.submitted, metrics.written, metrics.completions, metrics.failures, metrics.timeouts
        );
        bus.close();

        let timings = &status.step_timings;
        for (name, stats) in [
            ("feeder", timings.feeder),
            ("classification", timings.classification),
            ("distribution", timings.distribution),
            ("tick", timings.total),
        ] {
            info!(
                "Step {}: last={}us, max={}us, mean={}us over {} ticks",
                name, stats.last_us, stats.max_us, stats.mean_us, stats.count
            );
        }

        println!("{}", serde_json::to_string_pretty(&status)?);
        Ok(())
    }
}

/// 消费零件事件，直到协调器释放发送端
fn spawn_event_printer(events: Receiver<PieceEvent>, print_json: bool) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("piece-events".to_string())
        .spawn(move || {
            for event in events {
                if !print_json {
                    info!(
                        "Piece {} stage={:?} status={:?}",
                        event.data.id.short(),
                        event.data.stage,
                        event.data.classification_status
                    );
                    continue;
                }
                match event.to_json() {
                    Ok(line) => println!("{}", line),
                    Err(e) => warn!("Failed to encode piece event: {}", e),
                }
            }
        })
        .context("Failed to spawn event printer")
}

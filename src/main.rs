//! DistRender 提交层演示程序
//!
//! 在软件 GPU 上运行若干帧，演示三条队列之间的依赖、拆分屏障、呈现节流
//! 以及资源的延迟释放与复用。
//!
//! # 使用方法
//!
//! ```bash
//! # 使用配置文件
//! cargo run
//!
//! # 同步提交、关闭屏障合并
//! cargo run -- --sync-submission --barriers off
//! ```
//!
//! # 帧结构
//!
//! ```text
//! ┌──────────┐   上传   ┌──────────┐   UAV 写   ┌──────────┐
//! │   Copy   │────────▶│ Compute  │──────────▶│ Graphics │──▶ Present
//! └──────────┘         └──────────┘           └──────────┘
//! ```

use std::sync::Arc;
use tracing::{debug, error, info};

use dist_render_submit::core::error::Result;
use dist_render_submit::core::{log, Config};
use dist_render_submit::gfx::software::SoftwareSwapChain;
use dist_render_submit::gfx::{Format, HeapType, QueueType, ResourceDesc, ResourceFlags, ResourceStates, SoftwareDevice};
use dist_render_submit::renderer::{Device, ResourceView};

const FRAMES: u32 = 120;

/// 应用程序入口点
///
/// 1. 加载配置文件（config.toml）并应用命令行参数
/// 2. 初始化日志系统
/// 3. 在软件 GPU 上运行演示帧
fn main() {
    // 1. 加载配置（在初始化日志之前）
    let mut config = Config::from_file_or_default("config.toml");

    // 2. 应用命令行参数
    config.apply_args(std::env::args());

    // 3. 验证配置
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    // 4. 初始化日志系统
    let log_file = if config.logging.file_output {
        Some(config.logging.log_file.as_str())
    } else {
        None
    };
    if let Err(e) = log::init_logger(config.logging.level, config.logging.file_output, log_file) {
        eprintln!("Failed to initialize logger: {}", e);
    }
    info!(version = env!("CARGO_PKG_VERSION"), "DistRender submission demo starting...");
    info!(
        async_graphics = config.scheduler.async_graphics,
        max_frame_latency = config.scheduler.max_frame_latency,
        barriers = ?config.scheduler.barrier_batching,
        "Scheduler configuration"
    );

    // 5. 运行演示帧
    if let Err(e) = run(&config) {
        error!("Demo failed: {}", e);
        eprintln!("Demo failed: {}", e);
        std::process::exit(1);
    }
}

fn run(config: &Config) -> Result<()> {
    let device = Device::new(Arc::new(SoftwareDevice::new()), &config.scheduler)?;
    let swap_chain = Arc::new(SoftwareSwapChain::new(2));

    let back_buffer = device.create_committed_resource(
        &ResourceDesc::texture_2d(1280, 720, Format::B8G8R8A8Unorm, 1, 1).with_flags(ResourceFlags::ALLOW_RENDER_TARGET),
        ResourceStates::PRESENT,
        false,
    )?;
    let particles = device.create_committed_resource(
        &ResourceDesc::buffer(64 * 1024, HeapType::Default).with_flags(ResourceFlags::ALLOW_UNORDERED_ACCESS),
        ResourceStates::COMMON,
        false,
    )?;
    let staging_desc = ResourceDesc::buffer(16 * 1024, HeapType::Upload);
    let instance_desc = ResourceDesc::buffer(16 * 1024, HeapType::Default);

    for frame in 0..FRAMES {
        // 上传缓冲区释放后经由回收堆复用，实例缓冲区每帧重新分配
        let staging = device.create_committed_resource(&staging_desc, ResourceStates::COPY_SOURCE, true)?;
        let instances = device.create_committed_resource(&instance_desc, ResourceStates::COPY_DEST, false)?;

        if let Some(copy) = device.command_list(QueueType::Copy) {
            copy.lock().copy_resource(&instances, &staging);
        }
        device.scheduler().submit_commands(QueueType::Copy, false)?;

        if let Some(compute) = device.command_list(QueueType::Compute) {
            let mut list = compute.lock();
            list.prepare_shader_resource_usage(&instances, &ResourceView::whole());
            list.prepare_uav_usage(&particles, &ResourceView::whole());
            list.dispatch(256, 1, 1);
        }
        device.scheduler().submit_commands(QueueType::Compute, false)?;

        if let Some(graphics) = device.command_list(QueueType::Graphics) {
            let mut list = graphics.lock();
            list.clear_render_target(&back_buffer, &ResourceView::whole(), [0.1, 0.1, 0.1, 1.0]);
            list.prepare_shader_resource_usage(&particles, &ResourceView::whole());
            list.draw(6, 1024);
            // 交还给计算队列
            particles.transition_barrier(&mut list, ResourceStates::COMMON);
        }
        device.scheduler().present(swap_chain.clone(), &back_buffer, 1)?;

        drop(staging);
        drop(instances);
        let movement = device.end_of_frame(false)?;
        debug!(
            frame,
            freed = movement.freed,
            recycled = movement.recycled,
            evicted = movement.evicted,
            "Frame finished"
        );
    }

    device.flush_and_wait_for_gpu()?;

    let heaps = device.heap_stats();
    info!(
        frames = FRAMES,
        presents = swap_chain.present_count(),
        allocations = heaps.allocations,
        reuses = heaps.reuses,
        releases = heaps.releases,
        evictions = heaps.evictions,
        "Demo finished"
    );
    for queue in QueueType::ALL {
        let stats = device.scheduler().pool_stats(queue);
        info!(
            queue = %queue,
            lists = stats.created,
            submitted = stats.submitted,
            peak_live = stats.peak_live,
            "Command list pool"
        );
    }
    Ok(())
}

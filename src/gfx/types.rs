//! 与具体图形 API 无关的基础类型
//!
//! 队列类别、资源状态、屏障描述、资源描述以及可记录的 GPU 命令。
//! 数值布局参考 D3D12，便于原生后端直接映射。

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::Hasher;

/// 硬件队列类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QueueType {
    /// 图形队列（可执行所有命令）
    Graphics = 0,
    /// 计算队列
    Compute = 1,
    /// 复制队列
    Copy = 2,
}

impl QueueType {
    /// 队列类别数量
    pub const COUNT: usize = 3;

    /// 所有队列类别，按索引顺序
    pub const ALL: [QueueType; 3] = [QueueType::Graphics, QueueType::Compute, QueueType::Copy];

    /// 在各类按队列索引的数组中的下标
    pub fn index(self) -> usize {
        self as usize
    }

    /// 从下标恢复队列类别
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// 短名称，用于日志和线程名
    pub fn name(self) -> &'static str {
        match self {
            QueueType::Graphics => "gfx",
            QueueType::Compute => "cmp",
            QueueType::Copy => "cpy",
        }
    }

    /// 该队列能否执行给定状态之间的转换
    ///
    /// 复制队列只能处理 COMMON / COPY_SOURCE / COPY_DEST，
    /// 计算队列不能处理光栅化相关状态。
    pub fn supports_states(self, states: ResourceStates) -> bool {
        match self {
            QueueType::Graphics => true,
            QueueType::Compute => !states.intersects(ResourceStates::GRAPHICS_ONLY),
            QueueType::Copy => (states & !ResourceStates::COPY_QUEUE_STATES).is_empty(),
        }
    }
}

impl fmt::Display for QueueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    /// 资源状态
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceStates: u32 {
        const COMMON = 0;
        const VERTEX_AND_CONSTANT_BUFFER = 0x1;
        const INDEX_BUFFER = 0x2;
        const RENDER_TARGET = 0x4;
        const UNORDERED_ACCESS = 0x8;
        const DEPTH_WRITE = 0x10;
        const DEPTH_READ = 0x20;
        const NON_PIXEL_SHADER_RESOURCE = 0x40;
        const PIXEL_SHADER_RESOURCE = 0x80;
        const STREAM_OUT = 0x100;
        const INDIRECT_ARGUMENT = 0x200;
        const COPY_DEST = 0x400;
        const COPY_SOURCE = 0x800;
        const RESOLVE_DEST = 0x1000;
        const RESOLVE_SOURCE = 0x2000;
        const PRESENT = 0;
        const GENERIC_READ = Self::VERTEX_AND_CONSTANT_BUFFER.bits()
            | Self::INDEX_BUFFER.bits()
            | Self::NON_PIXEL_SHADER_RESOURCE.bits()
            | Self::PIXEL_SHADER_RESOURCE.bits()
            | Self::INDIRECT_ARGUMENT.bits()
            | Self::COPY_SOURCE.bits();

        const WRITE_STATES = Self::RENDER_TARGET.bits()
            | Self::UNORDERED_ACCESS.bits()
            | Self::DEPTH_WRITE.bits()
            | Self::STREAM_OUT.bits()
            | Self::COPY_DEST.bits()
            | Self::RESOLVE_DEST.bits();
        const GRAPHICS_ONLY = Self::VERTEX_AND_CONSTANT_BUFFER.bits()
            | Self::INDEX_BUFFER.bits()
            | Self::RENDER_TARGET.bits()
            | Self::DEPTH_WRITE.bits()
            | Self::DEPTH_READ.bits()
            | Self::PIXEL_SHADER_RESOURCE.bits()
            | Self::STREAM_OUT.bits()
            | Self::RESOLVE_DEST.bits()
            | Self::RESOLVE_SOURCE.bits();
        const COPY_QUEUE_STATES = Self::COPY_DEST.bits() | Self::COPY_SOURCE.bits();
    }
}

impl ResourceStates {
    /// 是否包含写访问
    pub fn is_write(self) -> bool {
        self.intersects(Self::WRITE_STATES)
    }

    /// 当前状态是否已满足期望状态，满足时不需要转换屏障
    ///
    /// COMMON 只与 COMMON 兼容；写状态必须完全相等；
    /// 只读组合状态包含期望的所有位即可。
    pub fn satisfies(self, desired: ResourceStates) -> bool {
        if self == desired {
            return true;
        }
        if desired.is_empty() || self.is_empty() {
            return false;
        }
        if desired.is_write() || self.is_write() {
            return false;
        }
        self.contains(desired)
    }
}

/// 覆盖资源全部子资源的下标
pub const ALL_SUBRESOURCES: u32 = u32::MAX;

/// 分离屏障标记
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BarrierSplit {
    /// 完整屏障
    None,
    /// 仅开始转换
    BeginOnly,
    /// 仅结束转换
    EndOnly,
}

/// 资源句柄，原生资源对象的唯一标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceHandle(pub u64);

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 资源屏障
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceBarrier {
    /// 状态转换
    Transition {
        resource: ResourceHandle,
        subresource: u32,
        before: ResourceStates,
        after: ResourceStates,
        split: BarrierSplit,
    },
    /// UAV 读写依赖，`None` 表示所有 UAV
    Uav { resource: Option<ResourceHandle> },
    /// 别名资源切换
    Aliasing {
        before: Option<ResourceHandle>,
        after: Option<ResourceHandle>,
    },
}

impl ResourceBarrier {
    /// 完整的状态转换屏障
    pub fn transition(
        resource: ResourceHandle,
        subresource: u32,
        before: ResourceStates,
        after: ResourceStates,
    ) -> Self {
        Self::Transition { resource, subresource, before, after, split: BarrierSplit::None }
    }

    /// 分离屏障的开始部分
    pub fn begin_only(
        resource: ResourceHandle,
        subresource: u32,
        before: ResourceStates,
        after: ResourceStates,
    ) -> Self {
        Self::Transition { resource, subresource, before, after, split: BarrierSplit::BeginOnly }
    }

    /// 分离屏障的结束部分
    pub fn end_only(
        resource: ResourceHandle,
        subresource: u32,
        before: ResourceStates,
        after: ResourceStates,
    ) -> Self {
        Self::Transition { resource, subresource, before, after, split: BarrierSplit::EndOnly }
    }

    /// UAV 屏障
    pub fn uav(resource: ResourceHandle) -> Self {
        Self::Uav { resource: Some(resource) }
    }

    /// 屏障作用的资源
    pub fn resource(&self) -> Option<ResourceHandle> {
        match *self {
            Self::Transition { resource, .. } => Some(resource),
            Self::Uav { resource } => resource,
            Self::Aliasing { after, .. } => after,
        }
    }
}

/// 资源维度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceDimension {
    Buffer = 1,
    Texture1D = 2,
    Texture2D = 3,
    Texture3D = 4,
}

/// 像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Unknown = 0,
    R32G32B32A32Float = 2,
    R16G16B16A16Float = 10,
    R8G8B8A8Unorm = 28,
    B8G8R8A8Unorm = 87,
    R32Float = 41,
    R32Uint = 42,
    D32Float = 40,
    D24UnormS8Uint = 45,
}

/// 堆类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeapType {
    /// 仅 GPU 可访问
    Default = 1,
    /// CPU 写、GPU 读
    Upload = 2,
    /// GPU 写、CPU 读
    Readback = 3,
}

bitflags! {
    /// 资源创建标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceFlags: u32 {
        const NONE = 0;
        const ALLOW_RENDER_TARGET = 0x1;
        const ALLOW_DEPTH_STENCIL = 0x2;
        const ALLOW_UNORDERED_ACCESS = 0x4;
        const DENY_SHADER_RESOURCE = 0x8;
        const ALLOW_CROSS_ADAPTER = 0x10;
        const ALLOW_SIMULTANEOUS_ACCESS = 0x20;
    }
}

/// 资源形状哈希，回收堆以此为键
pub type ShapeHash = u64;

/// 提交资源的描述
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceDesc {
    pub dimension: ResourceDimension,
    /// 对齐要求，由驱动决定，不参与形状哈希
    pub alignment: u64,
    pub width: u64,
    pub height: u32,
    pub depth_or_array_size: u16,
    pub mip_levels: u16,
    pub format: Format,
    pub sample_count: u32,
    pub flags: ResourceFlags,
    pub heap_type: HeapType,
}

/// 参与哈希的字节视图，不含任何填充
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct ShapeBlob {
    width: u64,
    alignment: u64,
    height: u32,
    dimension: u32,
    depth_or_array_size: u16,
    mip_levels: u16,
    format: u32,
    sample_count: u32,
    flags: u32,
    heap_type: u32,
    reserved: u32,
}

impl ResourceDesc {
    /// 缓冲区描述
    pub fn buffer(size: u64, heap_type: HeapType) -> Self {
        Self {
            dimension: ResourceDimension::Buffer,
            alignment: 0,
            width: size,
            height: 1,
            depth_or_array_size: 1,
            mip_levels: 1,
            format: Format::Unknown,
            sample_count: 1,
            flags: ResourceFlags::NONE,
            heap_type,
        }
    }

    /// 二维纹理描述（位于默认堆）
    pub fn texture_2d(width: u64, height: u32, format: Format, mip_levels: u16, array_size: u16) -> Self {
        Self {
            dimension: ResourceDimension::Texture2D,
            alignment: 0,
            width,
            height,
            depth_or_array_size: array_size.max(1),
            mip_levels: mip_levels.max(1),
            format,
            sample_count: 1,
            flags: ResourceFlags::NONE,
            heap_type: HeapType::Default,
        }
    }

    /// 设置创建标志
    pub fn with_flags(mut self, flags: ResourceFlags) -> Self {
        self.flags = flags;
        self
    }

    /// 设置对齐
    pub fn with_alignment(mut self, alignment: u64) -> Self {
        self.alignment = alignment;
        self
    }

    /// 数组层数（三维纹理恒为 1）
    pub fn array_size(&self) -> u32 {
        match self.dimension {
            ResourceDimension::Texture3D => 1,
            _ => self.depth_or_array_size.max(1) as u32,
        }
    }

    /// 子资源数量
    pub fn subresource_count(&self) -> u32 {
        match self.dimension {
            ResourceDimension::Buffer => 1,
            _ => self.mip_levels.max(1) as u32 * self.array_size(),
        }
    }

    /// 子资源下标（mip 优先）
    pub fn subresource_index(&self, mip: u32, array_slice: u32) -> u32 {
        mip + array_slice * self.mip_levels.max(1) as u32
    }

    /// 结构哈希：尺寸、格式、标志和堆类型相同的资源哈希相同
    pub fn shape_hash(&self) -> ShapeHash {
        let mut blob = ShapeBlob::zeroed();
        blob.width = self.width;
        // 对齐是内在属性
        blob.alignment = 0;
        blob.height = self.height;
        blob.dimension = self.dimension as u32;
        blob.depth_or_array_size = self.depth_or_array_size;
        blob.mip_levels = self.mip_levels;
        blob.format = self.format as u32;
        blob.sample_count = self.sample_count;
        blob.flags = self.flags.bits();
        blob.heap_type = self.heap_type as u32;

        let mut hasher = DefaultHasher::new();
        hasher.write(bytemuck::bytes_of(&blob));
        hasher.finish()
    }
}

/// 可记录进原生命令列表的 GPU 命令
#[derive(Debug, Clone, PartialEq)]
pub enum GpuCommand {
    Barriers(Vec<ResourceBarrier>),
    Draw { vertex_count: u32, instance_count: u32 },
    DrawIndexed { index_count: u32, instance_count: u32 },
    Dispatch { x: u32, y: u32, z: u32 },
    CopyResource { dst: ResourceHandle, src: ResourceHandle },
    CopyBufferRegion {
        dst: ResourceHandle,
        dst_offset: u64,
        src: ResourceHandle,
        src_offset: u64,
        size: u64,
    },
    ClearRenderTarget { target: ResourceHandle, color: [f32; 4] },
    ClearDepthStencil { target: ResourceHandle, depth: f32, stencil: u8 },
    ClearUnorderedAccess { target: ResourceHandle, values: [u32; 4] },
    Discard { resource: ResourceHandle },
    BeginQuery { index: u32 },
    EndQuery { index: u32 },
    ResolveQuery { dst: ResourceHandle, start: u32, count: u32 },
}

impl GpuCommand {
    /// 是否为屏障批次
    pub fn is_barriers(&self) -> bool {
        matches!(self, GpuCommand::Barriers(_))
    }
}

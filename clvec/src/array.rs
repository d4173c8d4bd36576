//! Arrays partitioned across the devices of one or more contexts

use crate::{
    backend::{Buffer, DeviceKind, Event, KernelArg, MemFlags, ReadBack},
    context::Queue,
    debug,
    dtype::Constant,
    error::ClError,
    expr::{BOp, IntoExpr, Node, Terminal},
    partition::{alignup, partition},
    scalar::Scalar,
};
use core::marker::PhantomData;
use parking_lot::Mutex;

/// Contiguous array of `T` split into consecutive parts, one part per queue.
///
/// Device memory is written through shared references: assignments, writes and
/// fills enqueue commands on the queues and return once they are enqueued.
/// Commands on one device run in order, so reads observe every earlier write.
pub struct Array<T: Scalar> {
    queues: Vec<Queue>,
    part: Vec<usize>,
    // None for devices holding no elements
    buffers: Vec<Option<Buffer>>,
    // Last command enqueued for each device
    events: Mutex<Vec<Option<Event>>>,
    flags: MemFlags,
    _marker: PhantomData<T>,
}

/// Pending device to host copy into a borrowed slice.
/// Completes on [`Transfer::wait`] or when dropped.
#[must_use = "dropping a transfer blocks until it completes"]
pub struct Transfer<'a, T: Scalar> {
    dst: &'a mut [T],
    // element offset into dst and the copy landing there
    pending: Vec<(usize, ReadBack)>,
}

impl<T: Scalar> Array<T> {
    /// Array of zero elements bound to no device
    #[must_use]
    pub fn empty() -> Array<T> {
        Array {
            queues: Vec::new(),
            part: vec![0],
            buffers: Vec::new(),
            events: Mutex::new(Vec::new()),
            flags: MemFlags::default(),
            _marker: PhantomData,
        }
    }

    /// Array of `len` elements split over `queues` by the active partitioning policy.
    /// Contents are unspecified until written.
    ///
    /// # Errors
    /// Returns error if `queues` is empty or allocation fails.
    pub fn new(queues: &[Queue], len: usize) -> Result<Array<T>, ClError> {
        Array::with_flags(queues, len, MemFlags::ReadWrite)
    }

    /// Like [`Array::new`] with an access hint for the device buffers
    ///
    /// # Errors
    /// Returns error if `queues` is empty or allocation fails.
    pub fn with_flags(queues: &[Queue], len: usize, flags: MemFlags) -> Result<Array<T>, ClError> {
        if queues.is_empty() {
            return Err(ClError::NoDeviceAvailable);
        }
        let part = partition(len, queues)?;
        Array::with_partition(queues, part, flags)
    }

    /// Array holding a copy of `data`
    ///
    /// # Errors
    /// Returns error if `queues` is empty, allocation or upload fails.
    pub fn from_slice(queues: &[Queue], data: &[T]) -> Result<Array<T>, ClError> {
        let array = Array::new(queues, data.len())?;
        array.write(0, data, true)?;
        Ok(array)
    }

    fn with_partition(queues: &[Queue], part: Vec<usize>, flags: MemFlags) -> Result<Array<T>, ClError> {
        let mut buffers = Vec::with_capacity(queues.len());
        for (device, queue) in queues.iter().enumerate() {
            let size = part[device + 1] - part[device];
            buffers.push(if size == 0 { None } else { Some(queue.backend().allocate(size * T::byte_size(), flags)?) });
        }
        if debug().sched() {
            tracing::debug!("Allocated {} elements of {} partitioned as {part:?}", part[queues.len()], T::dtype());
        }
        Ok(Array {
            queues: queues.to_vec(),
            part,
            buffers,
            events: Mutex::new(vec![None; queues.len()]),
            flags,
            _marker: PhantomData,
        })
    }

    /// Fresh array on the same devices and partition, holding a copy of the contents
    ///
    /// # Errors
    /// Returns error if allocation or copy fails.
    pub fn try_clone(&self) -> Result<Array<T>, ClError> {
        if self.queues.is_empty() {
            return Ok(Array::empty());
        }
        let array = Array::with_partition(&self.queues, self.part.clone(), self.flags)?;
        array.copy_from(self)?;
        Ok(array)
    }

    /// Reallocates with `len` elements, partitioned anew over the same queues.
    /// The first `min(len, self.len())` elements keep their values.
    ///
    /// # Errors
    /// Returns error if the array is bound to no device and `len > 0`,
    /// or if allocation or copy fails.
    pub fn resize(&mut self, len: usize) -> Result<(), ClError> {
        if self.queues.is_empty() {
            if len == 0 {
                return Ok(());
            }
            return Err(ClError::NoDeviceAvailable);
        }
        let resized = Array::with_flags(&self.queues, len, self.flags)?;
        let common = len.min(self.len());
        if common > 0 {
            let mut prefix = vec![T::zeroed(); common];
            self.read(0, &mut prefix, true)?.wait()?;
            resized.write(0, &prefix, true)?;
        }
        *self = resized;
        Ok(())
    }

    /// Becomes a copy of `other`, on its devices and with its partition
    ///
    /// # Errors
    /// Returns error if allocation or copy fails.
    pub fn resize_to(&mut self, other: &Array<T>) -> Result<(), ClError> {
        *self = other.try_clone()?;
        Ok(())
    }

    /// Number of elements
    #[must_use]
    pub fn len(&self) -> usize {
        self.part.last().copied().unwrap_or(0)
    }

    /// True if the array holds no elements
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of parts, equal to the number of queues
    #[must_use]
    pub fn nparts(&self) -> usize {
        self.queues.len()
    }

    /// Elements held by the device at index `device`
    #[must_use]
    pub fn part_size(&self, device: usize) -> usize {
        match (self.part.get(device), self.part.get(device + 1)) {
            (Some(begin), Some(end)) => end - begin,
            _ => 0,
        }
    }

    /// Offsets of the parts, `nparts() + 1` entries
    #[must_use]
    pub fn partition(&self) -> &[usize] {
        &self.part
    }

    /// Queues the parts live on
    #[must_use]
    pub fn queues(&self) -> &[Queue] {
        &self.queues
    }

    pub(crate) fn terminal(&self) -> Terminal<'_> {
        Terminal { dtype: T::dtype(), part: &self.part, buffers: &self.buffers, queues: &self.queues }
    }

    /// Device index and element range of every part overlapping `offset..end`
    fn overlaps(&self, offset: usize, end: usize) -> impl Iterator<Item = (usize, usize, usize)> + '_ {
        (0..self.nparts()).filter_map(move |device| {
            let begin = offset.max(self.part[device]);
            let stop = end.min(self.part[device + 1]);
            (begin < stop).then_some((device, begin, stop))
        })
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<usize, ClError> {
        let end = offset.checked_add(len).unwrap_or(usize::MAX);
        if end > self.len() {
            return Err(ClError::RangeOutOfBounds { offset, end, len: self.len() });
        }
        Ok(end)
    }

    fn record(&self, device: usize, event: Event) {
        if let Some(slot) = self.events.lock().get_mut(device) {
            *slot = Some(event);
        }
    }

    /// Element at `index`. Round-trips through the device, meant for debugging.
    ///
    /// # Errors
    /// Returns error if `index` is past the end or the read fails.
    pub fn get(&self, index: usize) -> Result<T, ClError> {
        if index >= self.len() {
            return Err(ClError::IndexOutOfRange { index, len: self.len() });
        }
        let mut value = [T::zeroed()];
        self.read(index, &mut value, true)?.wait()?;
        Ok(value[0])
    }

    /// Sets the element at `index`. Round-trips through the device, meant for debugging.
    ///
    /// # Errors
    /// Returns error if `index` is past the end or the write fails.
    pub fn set(&self, index: usize, value: T) -> Result<(), ClError> {
        if index >= self.len() {
            return Err(ClError::IndexOutOfRange { index, len: self.len() });
        }
        self.write(index, &[value], true)
    }

    /// Copies `data` into elements `offset..offset + data.len()`.
    /// Non-blocking writes copy `data` before returning.
    ///
    /// # Errors
    /// Returns error if the range is past the end or an upload fails.
    pub fn write(&self, offset: usize, data: &[T], blocking: bool) -> Result<(), ClError> {
        if data.is_empty() {
            return Ok(());
        }
        let end = self.check_range(offset, data.len())?;
        let size = T::byte_size();
        for (device, begin, stop) in self.overlaps(offset, end) {
            let Some(buffer) = &self.buffers[device] else { continue };
            let bytes: &[u8] = bytemuck::cast_slice(&data[begin - offset..stop - offset]);
            let event = self.queues[device].backend().write(buffer, (begin - self.part[device]) * size, bytes, blocking)?;
            self.record(device, event);
        }
        Ok(())
    }

    /// Copies the whole of `data` to the front of the array, blocking
    ///
    /// # Errors
    /// Returns error if `data` is longer than the array or an upload fails.
    pub fn copy_from_host(&self, data: &[T]) -> Result<(), ClError> {
        self.write(0, data, true)
    }

    /// Copies elements `offset..offset + dst.len()` into `dst`.
    /// With `blocking` the returned transfer is already complete.
    ///
    /// # Errors
    /// Returns error if the range is past the end or a download fails.
    pub fn read<'a>(&self, offset: usize, dst: &'a mut [T], blocking: bool) -> Result<Transfer<'a, T>, ClError> {
        let mut transfer = Transfer { pending: Vec::new(), dst };
        if transfer.dst.is_empty() {
            return Ok(transfer);
        }
        let end = self.check_range(offset, transfer.dst.len())?;
        let size = T::byte_size();
        for (device, begin, stop) in self.overlaps(offset, end) {
            let Some(buffer) = &self.buffers[device] else { continue };
            let read_back = self.queues[device].backend().read(
                buffer,
                (begin - self.part[device]) * size,
                (stop - begin) * size,
                blocking,
            )?;
            transfer.pending.push((begin - offset, read_back));
        }
        if blocking {
            transfer.complete()?;
        }
        Ok(transfer)
    }

    /// Whole array copied to the host
    ///
    /// # Errors
    /// Returns error if a download fails.
    pub fn to_vec(&self) -> Result<Vec<T>, ClError> {
        let mut data = vec![T::zeroed(); self.len()];
        self.read(0, &mut data, true)?.wait()?;
        Ok(data)
    }

    /// Evaluates `expr` elementwise into this array.
    ///
    /// The expression compiles to one kernel per context, reused for every later
    /// expression of the same shape and element types, and runs once on every
    /// device with a nonempty part. An expression that is a single array is a
    /// device to device copy.
    ///
    /// # Errors
    /// Returns error if an operand is partitioned differently or lives on other
    /// queues, if the expression
    /// has no array operand, or if compilation or launch fails.
    pub fn assign<'a>(&self, expr: impl IntoExpr<'a, T>) -> Result<(), ClError> {
        self.assign_node(&expr.into_expr().node)
    }

    /// Device to device copy of `other`, which must share the queues and partition
    ///
    /// # Errors
    /// Returns error if the queues or partitions differ or a copy fails.
    pub fn copy_from(&self, other: &Array<T>) -> Result<(), ClError> {
        self.assign_node(&Node::Vector(other.terminal()))
    }

    fn assign_node(&self, node: &Node) -> Result<(), ClError> {
        if self.is_empty() {
            return Ok(());
        }
        for device in 0..self.nparts() {
            let expected = self.part_size(device);
            if let Some(found) = node.mismatched_part(device, expected) {
                return Err(ClError::PartitionMismatch { device, expected, found });
            }
        }
        if let Some(device) = node.mismatched_queue(&self.queues) {
            return Err(ClError::QueueMismatch { device });
        }
        if (0..self.nparts()).all(|device| node.part_size(device) == 0) {
            return Err(ClError::ScalarExpression { len: self.len() });
        }
        if let Node::Vector(src) = node {
            return self.copy_parts(src);
        }

        let dtype = T::dtype();
        for (device, queue) in self.queues.iter().enumerate() {
            let Some(buffer) = &self.buffers[device] else { continue };
            let size = self.part_size(device);
            let kernel = queue.context().kernel(node, dtype)?;
            let local = kernel.workgroup_size;
            let global = match kernel.kind {
                DeviceKind::Cpu => alignup(size, local),
                DeviceKind::Gpu => queue.info().compute_units * local * 4,
            };
            let mut args = vec![KernelArg::Scalar(Constant::U64(size as u64)), KernelArg::Buffer(buffer.clone())];
            node.kernel_args(&mut args, device)?;
            if debug().sched() {
                tracing::debug!(
                    kernel = %node.kernel_name(),
                    "Launching on {} with {global} work items, workgroup {local}, {size} elements",
                    queue.info().name
                );
            }
            let event = queue.backend().launch(&kernel.program, global, local, args)?;
            self.record(device, event);
        }
        Ok(())
    }

    fn copy_parts(&self, src: &Terminal) -> Result<(), ClError> {
        let bytes = T::byte_size();
        for (device, queue) in self.queues.iter().enumerate() {
            let (Some(dst), Some(Some(src))) = (&self.buffers[device], src.buffers.get(device)) else { continue };
            let event = queue.backend().copy(src, 0, dst, 0, self.part_size(device) * bytes)?;
            self.record(device, event);
        }
        Ok(())
    }

    /// Sets every element to `value`
    ///
    /// # Errors
    /// Returns error if an upload fails.
    pub fn fill(&self, value: T) -> Result<(), ClError> {
        for (device, queue) in self.queues.iter().enumerate() {
            let Some(buffer) = &self.buffers[device] else { continue };
            let data = vec![value; self.part_size(device)];
            let event = queue.backend().write(buffer, 0, bytemuck::cast_slice(&data), false)?;
            self.record(device, event);
        }
        Ok(())
    }

    /// Blocks until every command enqueued for this array has completed
    ///
    /// # Errors
    /// Returns the error of the first failed command.
    pub fn wait(&self) -> Result<(), ClError> {
        let events: Vec<Event> = self.events.lock().iter_mut().filter_map(Option::take).collect();
        for event in events {
            event.wait()?;
        }
        Ok(())
    }
}

impl<T: Scalar> core::fmt::Debug for Array<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Array")
            .field("dtype", &T::dtype())
            .field("len", &self.len())
            .field("partition", &self.part)
            .field("queues", &self.queues)
            .finish()
    }
}

impl<T: Scalar> Transfer<'_, T> {
    /// Blocks until the data has arrived
    ///
    /// # Errors
    /// Returns error if a download failed.
    pub fn wait(mut self) -> Result<(), ClError> {
        self.complete()
    }

    fn complete(&mut self) -> Result<(), ClError> {
        for (offset, read_back) in core::mem::take(&mut self.pending) {
            let data = read_back.finish()?;
            let count = data.len() / T::byte_size();
            let dst: &mut [u8] = bytemuck::cast_slice_mut(&mut self.dst[offset..offset + count]);
            dst.copy_from_slice(&data);
        }
        Ok(())
    }
}

impl<T: Scalar> Drop for Transfer<'_, T> {
    fn drop(&mut self) {
        let _ = self.complete();
    }
}

// Operator forms can not return errors, they panic like the arithmetic they mirror.
macro_rules! impl_assign_op {
    ($trait:ident, $fn:ident, $op:expr) => {
        impl<'a, T: Scalar, R: IntoExpr<'a, T>> core::ops::$trait<R> for Array<T> {
            fn $fn(&mut self, rhs: R) {
                let this: &Array<T> = self;
                let node = Node::Binary {
                    op: $op,
                    x: Box::new(Node::Vector(this.terminal())),
                    y: Box::new(rhs.into_expr().node),
                };
                if let Err(e) = this.assign_node(&node) {
                    panic!("{e}");
                }
            }
        }
    };
}

impl_assign_op!(AddAssign, add_assign, BOp::Add);
impl_assign_op!(SubAssign, sub_assign, BOp::Sub);
impl_assign_op!(MulAssign, mul_assign, BOp::Mul);
impl_assign_op!(DivAssign, div_assign, BOp::Div);

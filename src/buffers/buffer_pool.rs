use bytes::BytesMut;
use tracing::{debug, trace};

/// A bounded pool of scratch buffers for the send and reassembly paths. The pool belongs
///  to a single component and is only ever touched from that component's task, so there is
///  no locking - buffer ownership simply moves pool -> caller -> pool.
pub struct BufferPool {
    buffers: Vec<BytesMut>,
    max_pooled: usize,
}

impl BufferPool {
    pub fn new(max_pooled: usize) -> BufferPool {
        BufferPool {
            buffers: Vec::with_capacity(max_pooled),
            max_pooled,
        }
    }

    pub fn get_buffer(&mut self) -> BytesMut {
        if let Some(buffer) = self.buffers.pop() {
            trace!("returning buffer from pool");
            return buffer;
        }

        trace!("no buffer in pool: creating new buffer");
        BytesMut::new()
    }

    pub fn return_buffer(&mut self, mut buffer: BytesMut) {
        buffer.clear();

        if self.buffers.len() < self.max_pooled {
            self.buffers.push(buffer);
        }
        else {
            debug!("pool is full: discarding returned buffer");
        }
    }
}

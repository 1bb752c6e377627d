use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::common::{PageId, Result, SiltError, PAGE_SIZE};

use super::DiskManager;

type PageBuf = Box<[u8; PAGE_SIZE]>;

/// A disk I/O request, carrying its own buffer and a reply channel.
enum DiskRequest {
    Read {
        page_id: PageId,
        reply: Sender<Result<PageBuf>>,
    },
    Write {
        page_id: PageId,
        data: PageBuf,
        reply: Sender<Result<()>>,
    },
}

/// DiskScheduler serializes page I/O through a background worker thread fed
/// by a bounded request queue. The buffer pool talks to disk exclusively
/// through the synchronous wrappers below.
pub struct DiskScheduler {
    disk_manager: Arc<DiskManager>,
    request_tx: Sender<DiskRequest>,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    /// Spawns the worker thread for the given disk manager.
    pub fn new(disk_manager: Arc<DiskManager>) -> Self {
        let (request_tx, request_rx) = bounded::<DiskRequest>(128);
        let shutdown = Arc::new(AtomicBool::new(false));

        let dm = Arc::clone(&disk_manager);
        let stop = Arc::clone(&shutdown);
        let worker = thread::spawn(move || Self::run_worker(dm, request_rx, stop));

        Self {
            disk_manager,
            request_tx,
            shutdown,
            worker: Some(worker),
        }
    }

    /// Reads a page through the worker and blocks until it completes.
    pub fn read_page_sync(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);

        let (reply_tx, reply_rx) = bounded(1);
        self.request_tx
            .send(DiskRequest::Read {
                page_id,
                reply: reply_tx,
            })
            .map_err(|e| SiltError::Scheduler(format!("failed to queue read: {e}")))?;

        let buf = reply_rx
            .recv()
            .map_err(|e| SiltError::Scheduler(format!("read reply lost: {e}")))??;
        data.copy_from_slice(&buf[..]);
        Ok(())
    }

    /// Writes a page through the worker and blocks until it completes.
    pub fn write_page_sync(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);

        let mut buf: PageBuf = Box::new([0u8; PAGE_SIZE]);
        buf.copy_from_slice(data);

        let (reply_tx, reply_rx) = bounded(1);
        self.request_tx
            .send(DiskRequest::Write {
                page_id,
                data: buf,
                reply: reply_tx,
            })
            .map_err(|e| SiltError::Scheduler(format!("failed to queue write: {e}")))?;

        reply_rx
            .recv()
            .map_err(|e| SiltError::Scheduler(format!("write reply lost: {e}")))??;
        Ok(())
    }

    fn run_worker(
        disk_manager: Arc<DiskManager>,
        receiver: Receiver<DiskRequest>,
        shutdown: Arc<AtomicBool>,
    ) {
        loop {
            if shutdown.load(Ordering::Relaxed) {
                // Drain remaining requests before exiting
                while let Ok(request) = receiver.try_recv() {
                    Self::process_request(&disk_manager, request);
                }
                break;
            }

            match receiver.recv_timeout(Duration::from_millis(100)) {
                Ok(request) => Self::process_request(&disk_manager, request),
                Err(RecvTimeoutError::Timeout) => {
                    // Re-check the shutdown flag
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    fn process_request(disk_manager: &DiskManager, request: DiskRequest) {
        match request {
            DiskRequest::Read { page_id, reply } => {
                let mut buf: PageBuf = Box::new([0u8; PAGE_SIZE]);
                let result = disk_manager.read_page(page_id, &mut buf[..]).map(|_| buf);
                let _ = reply.send(result);
            }
            DiskRequest::Write {
                page_id,
                data,
                reply,
            } => {
                let _ = reply.send(disk_manager.write_page(page_id, &data[..]));
            }
        }
    }

    /// Returns a reference to the underlying DiskManager.
    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_disk_scheduler_read_write() {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        let scheduler = DiskScheduler::new(dm);

        let page_id = scheduler.disk_manager().allocate_page().unwrap();

        let mut write_data = [0u8; PAGE_SIZE];
        write_data[0] = 42;
        write_data[100] = 255;
        scheduler.write_page_sync(page_id, &write_data).unwrap();

        let mut read_data = [0u8; PAGE_SIZE];
        scheduler.read_page_sync(page_id, &mut read_data).unwrap();

        assert_eq!(read_data[0], 42);
        assert_eq!(read_data[100], 255);
    }

    #[test]
    fn test_disk_scheduler_many_requests() {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        let scheduler = DiskScheduler::new(dm);

        let pages: Vec<_> = (0..8)
            .map(|i| {
                let page_id = scheduler.disk_manager().allocate_page().unwrap();
                let data = [i as u8 + 1; PAGE_SIZE];
                scheduler.write_page_sync(page_id, &data).unwrap();
                page_id
            })
            .collect();

        for (i, &page_id) in pages.iter().enumerate() {
            let mut data = [0u8; PAGE_SIZE];
            scheduler.read_page_sync(page_id, &mut data).unwrap();
            assert_eq!(data[0], i as u8 + 1);
        }
    }

    #[test]
    fn test_disk_scheduler_concurrent_requests() {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        let scheduler = Arc::new(DiskScheduler::new(dm));

        // Pre-allocate pages
        let page_ids: Vec<_> = (0..10)
            .map(|_| scheduler.disk_manager().allocate_page().unwrap())
            .collect();

        // Spawn threads to write concurrently
        let handles: Vec<_> = page_ids
            .iter()
            .map(|&page_id| {
                let scheduler = Arc::clone(&scheduler);
                thread::spawn(move || {
                    let mut data = [0u8; PAGE_SIZE];
                    data[0] = page_id.as_i32() as u8;
                    scheduler.write_page_sync(page_id, &data).unwrap();
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        // Verify all writes
        for &page_id in &page_ids {
            let mut data = [0u8; PAGE_SIZE];
            scheduler.read_page_sync(page_id, &mut data).unwrap();
            assert_eq!(data[0], page_id.as_i32() as u8);
        }
    }
}

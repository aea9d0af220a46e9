use crate::{binary::types::Limits, error::Error};
use anyhow::Result;

pub const PAGE_SIZE: usize = 65536;

/// Linear memory owned by an instance.
#[derive(Default, Debug, Clone)]
pub struct MemoryInst {
    pub data: Vec<u8>,
    pub max: Option<u32>,
}

impl MemoryInst {
    pub fn new(limits: Limits, max_pages: u32) -> Result<Self> {
        let max = limits.max.map_or(max_pages, |max| max.min(max_pages));
        if limits.min > max {
            return Err(Error::MemoryLimit {
                pages: limits.min,
                max,
            }
            .into());
        }
        Ok(Self {
            data: vec![0; limits.min as usize * PAGE_SIZE],
            max: Some(max),
        })
    }

    pub fn pages(&self) -> usize {
        self.data.len() / PAGE_SIZE
    }

    /// Grows the memory by `delta` pages and returns the previous page
    /// count. Views taken before growing are invalidated by the borrow.
    pub fn grow(&mut self, delta: u32) -> Result<usize> {
        let prev = self.pages();
        let pages = prev as u64 + delta as u64;
        let max = self.max.unwrap_or(u32::MAX);
        if pages > max as u64 {
            return Err(Error::MemoryLimit {
                pages: pages.min(u32::MAX as u64) as u32,
                max,
            }
            .into());
        }
        self.data.resize(pages as usize * PAGE_SIZE, 0);
        Ok(prev)
    }

    pub fn view(&mut self) -> MemoryView<'_> {
        let pages = self.pages();
        MemoryView {
            pages,
            data: &mut self.data[..pages * PAGE_SIZE],
        }
    }
}

/// A window onto linear memory handed to a native import for the duration
/// of one call.
#[derive(Debug)]
pub struct MemoryView<'a> {
    pages: usize,
    data: &'a mut [u8],
}

impl<'a> MemoryView<'a> {
    /// Builds a view over `pages` pages at the start of `data`.
    pub fn new(pages: usize, data: &'a mut [u8]) -> Result<Self> {
        let size = pages * PAGE_SIZE;
        if data.len() < size {
            return Err(Error::MemoryAccess {
                offset: 0,
                len: size,
            }
            .into());
        }
        Ok(Self {
            pages,
            data: &mut data[..size],
        })
    }

    pub fn empty() -> MemoryView<'static> {
        MemoryView {
            pages: 0,
            data: &mut [],
        }
    }

    /// # Safety
    ///
    /// `base` must point to `pages * PAGE_SIZE` writable bytes that stay
    /// valid and unaliased for `'a`. `base` may be null when `pages` is 0.
    pub unsafe fn from_raw(pages: usize, base: *mut u8) -> Self {
        let data: &'a mut [u8] = if pages == 0 || base.is_null() {
            &mut []
        } else {
            unsafe { std::slice::from_raw_parts_mut(base, pages * PAGE_SIZE) }
        };
        Self {
            pages: data.len() / PAGE_SIZE,
            data,
        }
    }

    pub fn pages(&self) -> usize {
        self.pages
    }

    pub fn size(&self) -> usize {
        self.pages * PAGE_SIZE
    }

    pub fn data(&self) -> &[u8] {
        &*self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut *self.data
    }

    pub fn read(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let end = offset.checked_add(len).ok_or(Error::MemoryAccess { offset, len })?;
        self.data
            .get(offset..end)
            .ok_or_else(|| Error::MemoryAccess { offset, len }.into())
    }

    pub fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        let len = bytes.len();
        let end = offset.checked_add(len).ok_or(Error::MemoryAccess { offset, len })?;
        let dst = self
            .data
            .get_mut(offset..end)
            .ok_or(Error::MemoryAccess { offset, len })?;
        dst.copy_from_slice(bytes);
        Ok(())
    }

    pub fn read_i32(&self, offset: usize) -> Result<i32> {
        Ok(i32::from_le_bytes(self.read(offset, 4)?.try_into()?))
    }

    pub fn write_i32(&mut self, offset: usize, value: i32) -> Result<()> {
        self.write(offset, &value.to_le_bytes())
    }

    pub fn read_str(&self, offset: usize, len: usize) -> Result<&str> {
        Ok(std::str::from_utf8(self.read(offset, len)?)?)
    }
}

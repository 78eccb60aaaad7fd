//! Repository接口定义
//!
//! 持久化存储的抽象接口：领域层定义接口，基础设施层（或内存实现）实现接口。
//! 所有读-改-写操作都经由版本号比较交换完成，避免并发下的更新丢失。

pub mod message_repository;
pub mod queue_repository;
pub mod report_repository;
pub mod session_repository;
pub mod user_repository;

pub use message_repository::MessageRepository;
pub use queue_repository::QueueRepository;
pub use report_repository::ReportRepository;
pub use session_repository::SessionRepository;
pub use user_repository::UserRepository;

/// 条件更新的最大比较交换次数
pub const MAX_CAS_ATTEMPTS: usize = 16;

/// 分页参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
}

impl Pagination {
    pub const MAX_PAGE_SIZE: u32 = 100;

    pub fn new(page: u32, page_size: u32) -> Self {
        Self {
            page: page.max(1),
            page_size: page_size.clamp(1, Self::MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.page_size)
    }

    pub fn limit(&self) -> u64 {
        u64::from(self.page_size)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(1, 20)
    }
}

/// 分页结果
#[derive(Debug, Clone, serde::Serialize)]
pub struct PaginatedResult<T> {
    pub items: Vec<T>,
    pub total_count: u64,
    pub page: u32,
    pub page_size: u32,
    pub has_next: bool,
    pub has_prev: bool,
}

impl<T> PaginatedResult<T> {
    pub fn new(items: Vec<T>, total_count: u64, pagination: Pagination) -> Self {
        let has_next = pagination.offset() + (items.len() as u64) < total_count;
        let has_prev = pagination.page > 1;

        Self {
            items,
            total_count,
            page: pagination.page,
            page_size: pagination.page_size,
            has_next,
            has_prev,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_is_clamped() {
        let p = Pagination::new(0, 1000);
        assert_eq!(p.page, 1);
        assert_eq!(p.page_size, Pagination::MAX_PAGE_SIZE);
        assert_eq!(Pagination::new(3, 10).offset(), 20);
    }

    #[test]
    fn paginated_result_flags() {
        let page = PaginatedResult::new(vec![1, 2], 5, Pagination::new(2, 2));
        assert!(page.has_next);
        assert!(page.has_prev);
        let last = PaginatedResult::new(vec![5], 5, Pagination::new(3, 2));
        assert!(!last.has_next);
    }
}

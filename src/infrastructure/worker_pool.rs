//! 有界并发工作池
//!
//! 并发上限是对上游限流的背压控制，不允许无界扇出。
//! 单个任务失败不会取消其他任务，结果按键收集、不保证顺序。

use std::{collections::HashMap, future::Future, hash::Hash};

use futures::stream::{self, StreamExt};

#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// 并发执行，收集全部结果（完成顺序）
    pub async fn run<I, F, Fut, T>(&self, items: I, task: F) -> Vec<T>
    where
        I: IntoIterator,
        F: Fn(I::Item) -> Fut,
        Fut: Future<Output = T>,
    {
        stream::iter(items.into_iter().map(task))
            .buffer_unordered(self.workers)
            .collect()
            .await
    }

    /// 并发执行并按键收集成功结果；返回 None 的任务不出现在结果中
    pub async fn run_keyed<K, I, F, Fut, V>(&self, keys: I, task: F) -> HashMap<K, V>
    where
        K: Eq + Hash + Clone,
        I: IntoIterator<Item = K>,
        F: Fn(K) -> Fut,
        Fut: Future<Output = Option<V>>,
    {
        stream::iter(keys.into_iter().map(|key| {
            let fut = task(key.clone());
            async move { fut.await.map(|v| (key, v)) }
        }))
        .buffer_unordered(self.workers)
        .filter_map(|entry| async move { entry })
        .collect()
        .await
    }
}

//! 以有界的工作群組並行執行每個授權的挑戰，並等待全部完成。
//!
//! 每個任務在自己的 scoped thread 中執行，結果經由 channel 回報。
//! [`CompletionBarrier::wait_all`] 一定會收齊 N 個結果（或確認某個工作者
//! 已消失）且所有執行緒都被 join 後才返回；第一個失敗或期限到達時，
//! 透過 [`CancelToken`] 通知其餘工作者停止。

use std::{
    io,
    sync::{
        mpsc::{self, RecvTimeoutError},
        Arc, Condvar, Mutex, PoisonError,
    },
    thread,
    time::{Duration, Instant},
};

use log::{debug, info, warn};
use thiserror::Error;

/// 協作式取消旗標。複製後共用同一個狀態。
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (flag, cvar) = &*self.inner;
        *flag.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 睡眠至多 `duration`，被取消時提早醒來。回傳 `false` 表示已取消。
    pub fn sleep(&self, duration: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let guard = flag.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = cvar
            .wait_timeout_while(guard, duration, |cancelled| !*cancelled)
            .unwrap_or_else(PoisonError::into_inner);
        !*guard
    }
}

#[derive(Debug, Error)]
pub enum BarrierError<E> {
    #[error("Task {task} failed: {source}")]
    Failed {
        task: String,
        #[source]
        source: E,
    },
    #[error("Deadline elapsed with {completed}/{expected} task(s) completed")]
    DeadlineElapsed { completed: usize, expected: usize },
    #[error("Only {completed}/{expected} task(s) reported a result")]
    Incomplete { completed: usize, expected: usize },
    #[error("Failed to spawn worker: {0}")]
    Spawn(#[source] io::Error),
}

/// 等待一組任務全部完成的屏障，可設定整體期限。
#[derive(Debug, Clone, Default)]
pub struct CompletionBarrier {
    deadline: Option<Duration>,
}

impl CompletionBarrier {
    pub fn new(deadline: Option<Duration>) -> Self {
        CompletionBarrier { deadline }
    }

    /// 為每個任務啟動一個工作者，結果依任務順序回傳。
    ///
    /// 工作者收到任務內容與取消旗標；看到取消時應盡快返回。
    pub fn wait_all<T, E, F>(&self, tasks: &[String], worker: F) -> Result<Vec<T>, BarrierError<E>>
    where
        T: Send,
        E: Send,
        F: Fn(&str, &CancelToken) -> Result<T, E> + Sync,
    {
        let expected = tasks.len();
        let cancel = CancelToken::new();
        let started = Instant::now();

        thread::scope(|scope| {
            let (tx, rx) = mpsc::channel();
            let mut handles = Vec::with_capacity(expected);
            let mut failure: Option<BarrierError<E>> = None;

            for (index, task) in tasks.iter().enumerate() {
                let tx = tx.clone();
                let worker = &worker;
                let cancel = &cancel;
                let spawned = thread::Builder::new()
                    .name(format!("challenge-{}", index))
                    .spawn_scoped(scope, move || {
                        let result = worker(task.as_str(), cancel);
                        // 接收端只會在屏障返回後消失
                        let _ = tx.send((index, result));
                    });
                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(e) => {
                        cancel.cancel();
                        failure = Some(BarrierError::Spawn(e));
                        break;
                    }
                }
            }
            drop(tx);

            let spawned = handles.len();
            let mut results: Vec<Option<T>> = (0..expected).map(|_| None).collect();
            let mut received = 0;
            let mut deadline = self.deadline;

            while received < spawned {
                let message = match deadline {
                    Some(limit) => rx.recv_timeout(limit.saturating_sub(started.elapsed())),
                    None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
                };
                match message {
                    Ok((index, Ok(value))) => {
                        received += 1;
                        results[index] = Some(value);
                        info!("Task {} done ({}/{})", tasks[index], received, expected);
                    }
                    Ok((index, Err(source))) => {
                        received += 1;
                        if failure.is_none() {
                            warn!("Task {} failed, cancelling the rest", tasks[index]);
                            cancel.cancel();
                            failure = Some(BarrierError::Failed {
                                task: tasks[index].clone(),
                                source,
                            });
                        } else {
                            debug!("Task {} stopped after cancellation", tasks[index]);
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        warn!(
                            "Deadline elapsed with {}/{} task(s) completed",
                            received, expected
                        );
                        cancel.cancel();
                        if failure.is_none() {
                            failure = Some(BarrierError::DeadlineElapsed {
                                completed: received,
                                expected,
                            });
                        }
                        // 取消後繼續收齊剩餘結果
                        deadline = None;
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }

            // 主動 join，讓工作者的 panic 不會傳遞到 scope 之外
            let mut panicked = false;
            for handle in handles {
                panicked |= handle.join().is_err();
            }

            if let Some(err) = failure {
                return Err(err);
            }
            if panicked || received < expected {
                return Err(BarrierError::Incomplete {
                    completed: received,
                    expected,
                });
            }
            Ok(results.into_iter().flatten().collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn tasks(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_results_in_task_order() {
        let barrier = CompletionBarrier::new(None);
        let result: Result<Vec<String>, BarrierError<String>> =
            barrier.wait_all(&tasks(&["a", "b", "c"]), |task, _| {
                if task == "a" {
                    thread::sleep(Duration::from_millis(50));
                }
                Ok(task.to_uppercase())
            });
        assert_eq!(result.unwrap(), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_waits_for_slowest_worker() {
        let finished = AtomicUsize::new(0);
        let barrier = CompletionBarrier::new(None);
        let result: Result<Vec<()>, BarrierError<String>> =
            barrier.wait_all(&tasks(&["fast", "slow"]), |task, _| {
                if task == "slow" {
                    thread::sleep(Duration::from_millis(200));
                }
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        assert!(result.is_ok());
        assert_eq!(finished.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_first_failure_cancels_siblings() {
        let barrier = CompletionBarrier::new(None);
        let started = Instant::now();
        let result: Result<Vec<()>, BarrierError<String>> =
            barrier.wait_all(&tasks(&["bad", "slow"]), |task, cancel| {
                if task == "bad" {
                    return Err("boom".to_owned());
                }
                if cancel.sleep(Duration::from_secs(30)) {
                    Ok(())
                } else {
                    Err("cancelled".to_owned())
                }
            });
        match result {
            Err(BarrierError::Failed { task, source }) => {
                assert_eq!(task, "bad");
                assert_eq!(source, "boom");
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_deadline() {
        let barrier = CompletionBarrier::new(Some(Duration::from_millis(50)));
        let result: Result<Vec<()>, BarrierError<String>> =
            barrier.wait_all(&tasks(&["done", "stuck"]), |task, cancel| {
                if task == "done" || cancel.sleep(Duration::from_secs(30)) {
                    Ok(())
                } else {
                    Err("cancelled".to_owned())
                }
            });
        assert!(matches!(
            result,
            Err(BarrierError::DeadlineElapsed {
                completed: 1,
                expected: 2
            })
        ));
    }

    #[test]
    fn test_panicking_worker_is_incomplete() {
        let barrier = CompletionBarrier::new(None);
        let result: Result<Vec<()>, BarrierError<String>> =
            barrier.wait_all(&tasks(&["ok", "panics"]), |task, _| {
                if task == "panics" {
                    panic!("worker died");
                }
                Ok(())
            });
        assert!(matches!(
            result,
            Err(BarrierError::Incomplete {
                completed: 1,
                expected: 2
            })
        ));
    }

    #[test]
    fn test_no_tasks() {
        let barrier = CompletionBarrier::new(None);
        let result: Result<Vec<()>, BarrierError<String>> =
            barrier.wait_all(&[], |_, _| Ok(()));
        assert!(result.unwrap().is_empty());
    }

    #[test]
    fn test_cancel_token_wakes_sleeper() {
        let cancel = CancelToken::new();
        let remote = cancel.clone();
        let started = Instant::now();
        let sleeper = thread::spawn(move || remote.sleep(Duration::from_secs(30)));
        thread::sleep(Duration::from_millis(20));
        cancel.cancel();
        assert!(!sleeper.join().unwrap());
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}

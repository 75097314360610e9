#[cfg(test)]
mod tests {
    use deferred_promise::executor::EventLoop;
    use deferred_promise::{Deferred, Error, Promise, PromiseSitter, State, Value};
    use futures::executor::block_on;
    use std::sync::{Arc, Mutex};
    use std::{thread, time::Duration};

    fn pump_until(done: impl FnMut() -> bool) -> bool {
        EventLoop::main().run_until(done, Duration::from_secs(5))
    }

    #[test]
    fn test_all_rejects_and_never_resolves() {
        let p1 = Promise::create_resolved("a");
        let (d2, p2) = Deferred::with_promise();
        let p3 = Promise::create_resolved("c");
        let all = Promise::all([&p1, &p2, &p3]);
        let resolved = Arc::new(Mutex::new(false));
        let r = resolved.clone();
        all.on_resolved(move |_| *r.lock().unwrap() = true);

        d2.reject("err");
        EventLoop::main().process_events();
        assert_eq!(all.state(), State::Rejected);
        assert_eq!(all.value(), Value::from("err"));
        assert!(!*resolved.lock().unwrap());
    }

    #[test]
    fn test_any_resolves_with_first_value() {
        let (d1, p1) = Deferred::with_promise();
        let (d2, p2) = Deferred::with_promise();
        let any = Promise::any([&p1, &p2]);
        d1.resolve(5);
        assert_eq!(any.state(), State::Resolved);
        assert_eq!(any.value(), Value::from(5));
        d2.resolve(6);
        assert_eq!(any.value(), Value::from(5));
    }

    #[test]
    fn test_any_rejects_with_reasons_in_input_order() {
        let (d1, p1) = Deferred::with_promise();
        let (d2, p2) = Deferred::with_promise();
        let any = Promise::any(vec![p1, p2]);
        d1.reject("x");
        d2.reject("y");
        assert_eq!(any.state(), State::Rejected);
        assert_eq!(
            any.value().as_list(),
            Some(&[Value::from("x"), Value::from("y")][..])
        );
    }

    #[test]
    fn test_chain_through_delayed_nested_promise() {
        let (deferred, promise) = Deferred::with_promise();
        let chain = promise
            .then(|_| Promise::delayed_resolve(42, Duration::from_millis(10)))
            .then(|value| value.try_get::<i32>().map(|answer| answer + 1));

        deferred.resolve(());
        assert_eq!(chain.state(), State::Pending);
        assert!(pump_until(|| !chain.is_pending()));
        assert_eq!(chain.value(), Value::from(43));
    }

    #[test]
    fn test_three_link_chain_without_intermediates() {
        let (deferred, promise) = Deferred::with_promise();
        let log = Arc::new(Mutex::new(Vec::new()));
        let l1 = log.clone();
        let l2 = log.clone();
        let l3 = log.clone();
        let tail = promise
            .then(move |_| l1.lock().unwrap().push(1))
            .then(move |_| l2.lock().unwrap().push(2))
            .then(move |_| l3.lock().unwrap().push(3));
        drop(promise);

        deferred.resolve("go");
        assert_eq!(*log.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(tail.value(), Value::from("go"));
    }

    #[test]
    fn test_failure_recovery_and_type_errors() {
        let (deferred, promise) = Deferred::with_promise();
        let parsed = promise
            .then(|value| value.try_get::<String>().map_err(|err| err.to_string()))
            .fail(|reason| format!("fallback after {reason:?}"));

        deferred.resolve(12_u8);
        assert_eq!(parsed.state(), State::Resolved);
        let text = parsed.value().get::<String>().unwrap_or_default();
        assert!(text.starts_with("fallback after"), "{text}");
    }

    #[test]
    fn test_await_chain_across_threads() {
        let (deferred, promise) = Deferred::with_promise();
        let producer = thread::spawn(move || {
            for step in 0..3 {
                deferred.notify(step);
            }
            deferred.reject("gave up")
        });
        let progress = Arc::new(Mutex::new(Vec::new()));
        let p = progress.clone();
        let waited = promise.progress(move |step| p.lock().unwrap().push(step.clone()));

        let outcome = block_on(waited.wait());
        assert!(producer.join().expect("The producer thread has panicked"));
        assert_eq!(outcome, Err(Error::Rejected(Value::from("gave up"))));
        // Notifications sent before `progress` was attached are not replayed.
        assert!(progress.lock().unwrap().len() <= 3);
    }

    #[test]
    fn test_sitter_holds_tail_until_settled() {
        let sitter = PromiseSitter::new();
        let (deferred, promise) = Deferred::with_promise();
        let seen = Arc::new(Mutex::new(None));
        let s = seen.clone();
        let tail = promise.then(move |value| *s.lock().unwrap() = Some(value.clone()));
        sitter.add(&tail, &[]);
        assert!(sitter.contains(&tail));

        deferred.resolve("done");
        assert_eq!(*seen.lock().unwrap(), Some(Value::from("done")));
        assert!(pump_until(|| !sitter.contains(&tail)));

        sitter.add(&tail, &[]);
        assert!(!sitter.contains(&tail));
    }
}

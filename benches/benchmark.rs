//! Benchmarks of duorc pointers, against `std::rc::Rc` as control.

use std::rc::{Rc, Weak};

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use duorc::{make_intrusive, DefaultDelete, IntrusivePtr, RefCounted, SharedPtr, SimpleCounter, WeakPtr};

criterion_main!(control, shared, intrusive);

criterion_group!(control, control_clone_drop, control_upgrade);

criterion_group!(shared, shared_clone_drop, shared_lock, shared_new);

criterion_group!(intrusive, intrusive_clone_drop);

//  Time to clone then drop a `Rc`, the performance goal for the clone/drop benchmarks.
fn control_clone_drop(c: &mut Criterion) {
    let rc = Rc::new(42u64);

    c.bench_function("control clone/drop", |b| b.iter(|| drop(black_box(rc.clone()))));
}

fn control_upgrade(c: &mut Criterion) {
    let rc = Rc::new(42u64);
    let weak: Weak<u64> = Rc::downgrade(&rc);

    c.bench_function("control upgrade", |b| b.iter(|| drop(black_box(weak.upgrade()))));
}

fn shared_clone_drop(c: &mut Criterion) {
    let shared = SharedPtr::new(42u64);

    c.bench_function("shared clone/drop", |b| b.iter(|| drop(black_box(shared.clone()))));
}

fn shared_lock(c: &mut Criterion) {
    let shared = SharedPtr::new(42u64);
    let weak: WeakPtr<u64> = SharedPtr::downgrade(&shared);

    c.bench_function("shared lock", |b| b.iter(|| drop(black_box(weak.lock()))));
}

//  Combined allocation against a boxed object with a separate block.
fn shared_new(c: &mut Criterion) {
    c.bench_function("shared new", |b| b.iter(|| drop(black_box(SharedPtr::new(42u64)))));

    c.bench_function("shared from_box", |b| {
        b.iter(|| drop(black_box(SharedPtr::from_box(Box::new(42u64)))))
    });
}

struct Counted {
    _value: u64,
    counter: SimpleCounter,
}

unsafe impl RefCounted for Counted {
    type Counter = SimpleCounter;
    type Deleter = DefaultDelete;

    fn counter(&self) -> &SimpleCounter {
        &self.counter
    }
}

fn intrusive_clone_drop(c: &mut Criterion) {
    let ptr: IntrusivePtr<Counted> = make_intrusive(Counted {
        _value: 42,
        counter: SimpleCounter::new(),
    });

    c.bench_function("intrusive clone/drop", |b| b.iter(|| drop(black_box(ptr.clone()))));
}

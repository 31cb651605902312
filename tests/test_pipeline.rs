// tests/test_pipeline.rs — scheduler semantics, no GPU involved.
//
// The pipeline is generic over its execution context, so these tests
// drive it with `C = ()` and small scalar nodes: constants, an adder, a
// node that fails on demand, and a recorder that logs execution order
// into a shared cell.

use std::cell::RefCell;
use std::rc::Rc;

use keypack::pipeline::{
    Message, NodeError, Pipeline, PipelineError, PipelineNode, PortSpec,
};

// ===== Test nodes =====

struct ConstNode {
    name: &'static str,
    value: f64,
}

impl PipelineNode<()> for ConstNode {
    fn name(&self) -> &str {
        self.name
    }
    fn input_ports(&self) -> &[PortSpec] {
        &[]
    }
    fn output_ports(&self) -> &[PortSpec] {
        const OUT: [PortSpec; 1] = [PortSpec::scalar("value")];
        &OUT
    }
    fn run(&mut self, _cx: &mut (), _inputs: &[Message]) -> Result<Vec<Message>, NodeError> {
        Ok(vec![Message::Scalar(self.value)])
    }
}

struct AddNode;

impl PipelineNode<()> for AddNode {
    fn name(&self) -> &str {
        "add"
    }
    fn input_ports(&self) -> &[PortSpec] {
        const IN: [PortSpec; 2] = [PortSpec::scalar("a"), PortSpec::scalar("b")];
        &IN
    }
    fn output_ports(&self) -> &[PortSpec] {
        const OUT: [PortSpec; 1] = [PortSpec::scalar("sum")];
        &OUT
    }
    fn run(&mut self, _cx: &mut (), inputs: &[Message]) -> Result<Vec<Message>, NodeError> {
        let a = inputs[0].as_scalar().ok_or("a is not a scalar")?;
        let b = inputs[1].as_scalar().ok_or("b is not a scalar")?;
        Ok(vec![Message::Scalar(a + b)])
    }
}

/// Passes its input through and appends its name to a shared log.
struct RecorderNode {
    name: &'static str,
    log: Rc<RefCell<Vec<&'static str>>>,
}

impl PipelineNode<()> for RecorderNode {
    fn name(&self) -> &str {
        self.name
    }
    fn input_ports(&self) -> &[PortSpec] {
        const IN: [PortSpec; 1] = [PortSpec::scalar("in")];
        &IN
    }
    fn output_ports(&self) -> &[PortSpec] {
        const OUT: [PortSpec; 1] = [PortSpec::scalar("out")];
        &OUT
    }
    fn run(&mut self, _cx: &mut (), inputs: &[Message]) -> Result<Vec<Message>, NodeError> {
        self.log.borrow_mut().push(self.name);
        Ok(vec![inputs[0].clone()])
    }
}

/// Fails every run.
struct FailNode;

impl PipelineNode<()> for FailNode {
    fn name(&self) -> &str {
        "fail"
    }
    fn input_ports(&self) -> &[PortSpec] {
        const IN: [PortSpec; 1] = [PortSpec::scalar("in")];
        &IN
    }
    fn output_ports(&self) -> &[PortSpec] {
        const OUT: [PortSpec; 1] = [PortSpec::scalar("out")];
        &OUT
    }
    fn run(&mut self, _cx: &mut (), _inputs: &[Message]) -> Result<Vec<Message>, NodeError> {
        Err("deliberate failure".into())
    }
}

/// Declares one output port but produces nothing.
struct BrokenNode;

impl PipelineNode<()> for BrokenNode {
    fn name(&self) -> &str {
        "broken"
    }
    fn input_ports(&self) -> &[PortSpec] {
        &[]
    }
    fn output_ports(&self) -> &[PortSpec] {
        const OUT: [PortSpec; 1] = [PortSpec::scalar("out")];
        &OUT
    }
    fn run(&mut self, _cx: &mut (), _inputs: &[Message]) -> Result<Vec<Message>, NodeError> {
        Ok(vec![])
    }
}

/// Emits a keypoints-kinded port name but scalar values — used to check
/// kind validation of produced messages.
struct WrongKindNode;

impl PipelineNode<()> for WrongKindNode {
    fn name(&self) -> &str {
        "wrong-kind"
    }
    fn input_ports(&self) -> &[PortSpec] {
        &[]
    }
    fn output_ports(&self) -> &[PortSpec] {
        const OUT: [PortSpec; 1] = [PortSpec::keypoints("keypoints")];
        &OUT
    }
    fn run(&mut self, _cx: &mut (), _inputs: &[Message]) -> Result<Vec<Message>, NodeError> {
        Ok(vec![Message::Scalar(1.0)])
    }
}

// ===== Construction-time validation =====

#[test]
fn connect_rejects_kind_mismatch() {
    let mut p = Pipeline::<()>::new();
    let c = p.add_node(Box::new(ConstNode { name: "c", value: 1.0 }));
    let w = p.add_node(Box::new(WrongKindNode));
    // keypoints output into a scalar input
    let add = p.add_node(Box::new(AddNode));
    assert!(matches!(
        p.connect(w, "keypoints", add, "a"),
        Err(PipelineError::PortMismatch { .. })
    ));
    // sanity: the scalar edge is fine
    p.connect(c, "value", add, "a").expect("scalar edge");
}

#[test]
fn connect_rejects_unknown_ports() {
    let mut p = Pipeline::<()>::new();
    let c = p.add_node(Box::new(ConstNode { name: "c", value: 1.0 }));
    let add = p.add_node(Box::new(AddNode));
    assert!(matches!(
        p.connect(c, "nope", add, "a"),
        Err(PipelineError::UnknownPort { .. })
    ));
    assert!(matches!(
        p.connect(c, "value", add, "nope"),
        Err(PipelineError::UnknownPort { .. })
    ));
}

#[test]
fn connect_rejects_foreign_node_ids() {
    // A NodeId is only meaningful within the pipeline that minted it.
    let mut other = Pipeline::<()>::new();
    other.add_node(Box::new(ConstNode { name: "a", value: 1.0 }));
    other.add_node(Box::new(ConstNode { name: "b", value: 2.0 }));
    let foreign = other.add_node(Box::new(AddNode));

    let mut p = Pipeline::<()>::new();
    let c = p.add_node(Box::new(ConstNode { name: "c", value: 1.0 }));
    assert!(matches!(
        p.connect(c, "value", foreign, "a"),
        Err(PipelineError::UnknownNode { .. })
    ));
    assert!(matches!(
        p.connect(foreign, "sum", c, "in"),
        Err(PipelineError::UnknownNode { .. })
    ));
}

#[test]
fn connect_rejects_double_connected_input() {
    let mut p = Pipeline::<()>::new();
    let c1 = p.add_node(Box::new(ConstNode { name: "c1", value: 1.0 }));
    let c2 = p.add_node(Box::new(ConstNode { name: "c2", value: 2.0 }));
    let add = p.add_node(Box::new(AddNode));
    p.connect(c1, "value", add, "a").expect("first edge");
    assert!(matches!(
        p.connect(c2, "value", add, "a"),
        Err(PipelineError::DuplicateInput { .. })
    ));
}

#[test]
fn compile_rejects_unconnected_input() {
    let mut p = Pipeline::<()>::new();
    let c = p.add_node(Box::new(ConstNode { name: "c", value: 1.0 }));
    let add = p.add_node(Box::new(AddNode));
    p.connect(c, "value", add, "a").expect("edge");
    // "b" left dangling
    assert!(matches!(
        p.compile(),
        Err(PipelineError::UnconnectedInput { .. })
    ));
}

#[test]
fn compile_rejects_cycles() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let mut p = Pipeline::<()>::new();
    let r1 = p.add_node(Box::new(RecorderNode { name: "r1", log: log.clone() }));
    let r2 = p.add_node(Box::new(RecorderNode { name: "r2", log: log.clone() }));
    p.connect(r1, "out", r2, "in").expect("edge");
    p.connect(r2, "out", r1, "in").expect("edge");
    assert!(matches!(p.compile(), Err(PipelineError::CycleDetected)));
}

#[test]
fn run_before_compile_is_rejected() {
    let mut p = Pipeline::<()>::new();
    p.add_node(Box::new(ConstNode { name: "c", value: 1.0 }));
    assert!(matches!(p.run(&mut ()), Err(PipelineError::NotCompiled)));
}

// ===== Execution =====

#[test]
fn adds_two_constants() {
    let mut p = Pipeline::<()>::new();
    let c1 = p.add_node(Box::new(ConstNode { name: "c1", value: 1.5 }));
    let c2 = p.add_node(Box::new(ConstNode { name: "c2", value: 2.25 }));
    let add = p.add_node(Box::new(AddNode));
    p.connect(c1, "value", add, "a").expect("edge");
    p.connect(c2, "value", add, "b").expect("edge");

    p.compile().expect("compile");
    assert!(p.output(add, "sum").is_none(), "no output before the first run");

    p.run(&mut ()).expect("run");
    let sum = p.output(add, "sum").and_then(Message::as_scalar);
    assert_eq!(sum, Some(3.75));
}

#[test]
fn diamond_runs_in_dependency_order() {
    //      ┌ left ┐
    // src ─┤      ├─ (order checked via the shared log)
    //      └ right┘
    let log = Rc::new(RefCell::new(Vec::new()));
    let mut p = Pipeline::<()>::new();
    let src = p.add_node(Box::new(ConstNode { name: "src", value: 0.0 }));
    let left = p.add_node(Box::new(RecorderNode { name: "left", log: log.clone() }));
    let right = p.add_node(Box::new(RecorderNode { name: "right", log: log.clone() }));
    let join = p.add_node(Box::new(AddNode));
    p.connect(src, "value", left, "in").expect("edge");
    p.connect(src, "value", right, "in").expect("edge");
    p.connect(left, "out", join, "a").expect("edge");
    p.connect(right, "out", join, "b").expect("edge");

    p.compile().expect("compile");
    p.run(&mut ()).expect("run");

    let order = log.borrow().clone();
    assert_eq!(order.len(), 2);
    assert!(order.contains(&"left") && order.contains(&"right"));
    assert_eq!(p.output(join, "sum").and_then(Message::as_scalar), Some(0.0));
}

#[test]
fn submission_order_is_stable_across_runs() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let mut p = Pipeline::<()>::new();
    let src = p.add_node(Box::new(ConstNode { name: "src", value: 0.0 }));
    let a = p.add_node(Box::new(RecorderNode { name: "a", log: log.clone() }));
    let b = p.add_node(Box::new(RecorderNode { name: "b", log: log.clone() }));
    p.connect(src, "value", a, "in").expect("edge");
    p.connect(a, "out", b, "in").expect("edge");
    p.compile().expect("compile");

    p.run(&mut ()).expect("run 1");
    p.run(&mut ()).expect("run 2");
    assert_eq!(*log.borrow(), vec!["a", "b", "a", "b"]);
}

#[test]
fn node_failure_aborts_the_run() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let mut p = Pipeline::<()>::new();
    let src = p.add_node(Box::new(ConstNode { name: "src", value: 0.0 }));
    let fail = p.add_node(Box::new(FailNode));
    let after = p.add_node(Box::new(RecorderNode { name: "after", log: log.clone() }));
    p.connect(src, "value", fail, "in").expect("edge");
    p.connect(fail, "out", after, "in").expect("edge");
    p.compile().expect("compile");

    let err = p.run(&mut ()).expect_err("run must fail");
    match err {
        PipelineError::NodeFailed { node, source } => {
            assert_eq!(node, "fail");
            assert_eq!(source.to_string(), "deliberate failure");
        }
        other => panic!("expected NodeFailed, got {other:?}"),
    }
    assert!(log.borrow().is_empty(), "downstream node ran after a failure");
}

#[test]
fn wrong_output_arity_is_an_output_mismatch() {
    let mut p = Pipeline::<()>::new();
    let broken = p.add_node(Box::new(BrokenNode));
    p.compile().expect("compile");
    let err = p.run(&mut ()).expect_err("run must fail");
    assert!(matches!(err, PipelineError::OutputMismatch { node } if node == "broken"));
}

#[test]
fn wrong_output_kind_is_an_output_mismatch() {
    let mut p = Pipeline::<()>::new();
    p.add_node(Box::new(WrongKindNode));
    p.compile().expect("compile");
    assert!(matches!(
        p.run(&mut ()),
        Err(PipelineError::OutputMismatch { .. })
    ));
}

#[test]
fn outputs_refresh_between_runs() {
    struct Counter {
        n: f64,
    }
    impl PipelineNode<()> for Counter {
        fn name(&self) -> &str {
            "counter"
        }
        fn input_ports(&self) -> &[PortSpec] {
            &[]
        }
        fn output_ports(&self) -> &[PortSpec] {
            const OUT: [PortSpec; 1] = [PortSpec::scalar("n")];
            &OUT
        }
        fn run(&mut self, _cx: &mut (), _inputs: &[Message]) -> Result<Vec<Message>, NodeError> {
            self.n += 1.0;
            Ok(vec![Message::Scalar(self.n)])
        }
    }

    let mut p = Pipeline::<()>::new();
    let c = p.add_node(Box::new(Counter { n: 0.0 }));
    p.compile().expect("compile");

    p.run(&mut ()).expect("run 1");
    assert_eq!(p.output(c, "n").and_then(Message::as_scalar), Some(1.0));
    p.run(&mut ()).expect("run 2");
    assert_eq!(p.output(c, "n").and_then(Message::as_scalar), Some(2.0));
}

#[test]
fn init_and_release_walk_the_graph() {
    // init in topological order, release in reverse.
    struct Lifecycle {
        name: &'static str,
        log: Rc<RefCell<Vec<String>>>,
    }
    impl PipelineNode<()> for Lifecycle {
        fn name(&self) -> &str {
            self.name
        }
        fn input_ports(&self) -> &[PortSpec] {
            &[]
        }
        fn output_ports(&self) -> &[PortSpec] {
            const OUT: [PortSpec; 1] = [PortSpec::scalar("out")];
            &OUT
        }
        fn init(&mut self, _cx: &mut ()) -> Result<(), NodeError> {
            self.log.borrow_mut().push(format!("init {}", self.name));
            Ok(())
        }
        fn run(&mut self, _cx: &mut (), _inputs: &[Message]) -> Result<Vec<Message>, NodeError> {
            Ok(vec![Message::Scalar(0.0)])
        }
        fn release(&mut self, _cx: &mut ()) -> Result<(), NodeError> {
            self.log.borrow_mut().push(format!("release {}", self.name));
            Ok(())
        }
    }

    let log = Rc::new(RefCell::new(Vec::new()));
    let mut p = Pipeline::<()>::new();
    p.add_node(Box::new(Lifecycle { name: "first", log: log.clone() }));
    p.add_node(Box::new(Lifecycle { name: "second", log: log.clone() }));

    p.init(&mut ()).expect("init");
    p.release(&mut ()).expect("release");
    assert_eq!(
        *log.borrow(),
        vec!["init first", "init second", "release second", "release first"]
    );
}

//! Tarjan's strongly-connected-components algorithm over node indices.
//!
//! Components come out in reverse topological order: every component is
//! emitted after all components it has edges into, so callees precede
//! callers. The walk keeps its own frame stack, so deep call chains do not
//! recurse on the native stack.

const UNVISITED: usize = usize::MAX;

struct TarjanState {
    index_counter: usize,
    stack: Vec<usize>,
    on_stack: Vec<bool>,
    indices: Vec<usize>,
    lowlinks: Vec<usize>,
    sccs: Vec<Vec<usize>>,
}

/// Strongly-connected components of the graph `successors[v] = edges out of v`.
/// Members of each component are sorted ascending.
pub fn tarjan_scc(successors: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let n = successors.len();
    let mut state = TarjanState {
        index_counter: 0,
        stack: Vec::new(),
        on_stack: vec![false; n],
        indices: vec![UNVISITED; n],
        lowlinks: vec![0; n],
        sccs: Vec::new(),
    };

    for node in 0..n {
        if state.indices[node] == UNVISITED {
            strongconnect(node, successors, &mut state);
        }
    }

    state.sccs
}

fn visit(v: usize, state: &mut TarjanState) {
    state.indices[v] = state.index_counter;
    state.lowlinks[v] = state.index_counter;
    state.index_counter += 1;
    state.stack.push(v);
    state.on_stack[v] = true;
}

fn strongconnect(root: usize, successors: &[Vec<usize>], state: &mut TarjanState) {
    // (node, next successor to look at)
    let mut frames: Vec<(usize, usize)> = vec![(root, 0)];
    visit(root, state);

    while let Some(frame) = frames.last_mut() {
        let v = frame.0;
        if let Some(&w) = successors[v].get(frame.1) {
            frame.1 += 1;
            if w >= successors.len() {
                continue;
            }
            if state.indices[w] == UNVISITED {
                visit(w, state);
                frames.push((w, 0));
            } else if state.on_stack[w] {
                state.lowlinks[v] = state.lowlinks[v].min(state.indices[w]);
            }
            continue;
        }

        // All successors done: v is finished.
        frames.pop();
        if let Some(&(parent, _)) = frames.last() {
            state.lowlinks[parent] = state.lowlinks[parent].min(state.lowlinks[v]);
        }

        // If v is a root node, pop the SCC
        if state.lowlinks[v] == state.indices[v] {
            let mut scc = Vec::new();
            while let Some(w) = state.stack.pop() {
                state.on_stack[w] = false;
                scc.push(w);
                if w == v {
                    break;
                }
            }
            scc.sort_unstable();
            state.sccs.push(scc);
        }
    }
}

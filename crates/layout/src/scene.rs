//! Widget-level front end: boxes, guidelines and barriers placed against
//! each other and the scene bounds, read back as integer frames.

use anchor_graph::{AnchorRole, Axis, BarrierSide, NodeId, ResolutionEdge};
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::config::LayoutConfig;
use crate::engine::LayoutEngine;
use crate::error::LayoutError;

/// Index of an element in its scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ElementId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Left or top.
    Begin,
    /// Right or bottom.
    End,
}

/// An edge constraint of a box: `margin` away from a side of another
/// element, or of the scene bounds when `element` is `None`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub element: Option<ElementId>,
    pub side: Side,
    pub margin: f64,
}

impl Attachment {
    pub fn parent(side: Side, margin: f64) -> Self {
        Self {
            element: None,
            side,
            margin,
        }
    }

    pub fn to(element: ElementId, side: Side, margin: f64) -> Self {
        Self {
            element: Some(element),
            side,
            margin,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Size {
    Fixed(f64),
    /// Stretch between both attachments. With a single attachment the box
    /// collapses to zero size.
    Fill,
}

/// One axis of a box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisSpec {
    pub size: Size,
    pub begin: Option<Attachment>,
    pub end: Option<Attachment>,
    /// Share of free space before the box when both sides are attached.
    pub bias: Option<f64>,
}

impl AxisSpec {
    pub fn fixed(size: f64) -> Self {
        Self {
            size: Size::Fixed(size),
            begin: None,
            end: None,
            bias: None,
        }
    }

    pub fn fill() -> Self {
        Self {
            size: Size::Fill,
            ..Self::fixed(0.0)
        }
    }

    pub fn begin(mut self, attachment: Attachment) -> Self {
        self.begin = Some(attachment);
        self
    }

    pub fn end(mut self, attachment: Attachment) -> Self {
        self.end = Some(attachment);
        self
    }

    pub fn bias(mut self, bias: f64) -> Self {
        self.bias = Some(bias);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoxSpec {
    pub horizontal: AxisSpec,
    pub vertical: AxisSpec,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum GuidelinePosition {
    /// Distance from the left or top bound.
    Begin(f64),
    /// Distance from the right or bottom bound.
    End(f64),
    /// Fraction of the scene size.
    Percent(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GuidelineSpec {
    pub axis: Axis,
    pub position: GuidelinePosition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarrierSpec {
    pub axis: Axis,
    pub side: BarrierSide,
    pub members: Vec<ElementId>,
    pub margin: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Element {
    Box(BoxSpec),
    Guideline(GuidelineSpec),
    Barrier(BarrierSpec),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Frame {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Geometry {
    Frame(Frame),
    Line { axis: Axis, position: i32 },
}

/// Nodes an element declared for the current pass.
#[derive(Debug, Clone, Copy)]
enum Anchors {
    Box {
        horizontal: (NodeId, NodeId),
        vertical: (NodeId, NodeId),
    },
    Line {
        axis: Axis,
        node: NodeId,
    },
}

impl Anchors {
    fn declare_box(engine: &mut LayoutEngine) -> Result<Self, LayoutError> {
        let left = engine.declare_anchor(AnchorRole::Left)?;
        let right = engine.declare_anchor(AnchorRole::Right)?;
        let top = engine.declare_anchor(AnchorRole::Top)?;
        let bottom = engine.declare_anchor(AnchorRole::Bottom)?;
        engine.set_opposite(left, right)?;
        engine.set_opposite(top, bottom)?;
        Ok(Anchors::Box {
            horizontal: (left, right),
            vertical: (top, bottom),
        })
    }

    fn declare_line(engine: &mut LayoutEngine, axis: Axis) -> Result<Self, LayoutError> {
        let role = match axis {
            Axis::Horizontal => AnchorRole::Left,
            Axis::Vertical => AnchorRole::Top,
        };
        Ok(Anchors::Line {
            axis,
            node: engine.declare_anchor(role)?,
        })
    }

    fn pair(&self, axis: Axis) -> Option<(NodeId, NodeId)> {
        match *self {
            Anchors::Box { horizontal, vertical } => Some(match axis {
                Axis::Horizontal => horizontal,
                Axis::Vertical => vertical,
            }),
            Anchors::Line { axis: line, node } => (line == axis).then_some((node, node)),
        }
    }

    fn side(&self, axis: Axis, side: Side) -> Option<NodeId> {
        self.pair(axis).map(|(begin, end)| match side {
            Side::Begin => begin,
            Side::End => end,
        })
    }
}

impl Element {
    fn declare(&self, engine: &mut LayoutEngine) -> Result<Anchors, LayoutError> {
        match self {
            Element::Box(_) => Anchors::declare_box(engine),
            Element::Guideline(spec) => Anchors::declare_line(engine, spec.axis),
            Element::Barrier(spec) => Anchors::declare_line(engine, spec.axis),
        }
    }

    fn emit(
        &self,
        index: usize,
        anchors: &[Anchors],
        parent: &Anchors,
        engine: &mut LayoutEngine,
    ) -> Result<(), LayoutError> {
        let Some(own) = anchors.get(index) else {
            return Ok(());
        };
        match self {
            Element::Box(spec) => {
                for (axis, axis_spec) in [(Axis::Horizontal, &spec.horizontal), (Axis::Vertical, &spec.vertical)] {
                    if let Some(pair) = own.pair(axis) {
                        emit_axis(index, axis, axis_spec, pair, anchors, parent, engine)?;
                    }
                }
            }
            Element::Guideline(spec) => {
                let (Some((node, _)), Some((begin, end))) = (own.pair(spec.axis), parent.pair(spec.axis)) else {
                    return Ok(());
                };
                let edge = match spec.position {
                    GuidelinePosition::Begin(offset) => ResolutionEdge::Direct {
                        target: Some(begin),
                        offset,
                    },
                    GuidelinePosition::End(offset) => ResolutionEdge::Direct {
                        target: Some(end),
                        offset: -offset,
                    },
                    GuidelinePosition::Percent(percent) => ResolutionEdge::Percent { begin, end, percent },
                };
                engine.add_resolution_edge(node, edge)?;
            }
            Element::Barrier(spec) => {
                let Some((node, _)) = own.pair(spec.axis) else {
                    return Ok(());
                };
                let side = match spec.side {
                    BarrierSide::Leading => Side::Begin,
                    BarrierSide::Trailing => Side::End,
                };
                let mut dependencies = Vec::with_capacity(spec.members.len());
                for member in &spec.members {
                    let dependency = anchors
                        .get(member.0)
                        .and_then(|anchors| anchors.side(spec.axis, side))
                        .ok_or(LayoutError::InvalidAttachment {
                            index,
                            target: member.0,
                            axis: spec.axis,
                        })?;
                    dependencies.push(dependency);
                }
                engine.add_barrier(node, spec.side, &dependencies, spec.margin)?;
            }
        }
        Ok(())
    }

    fn read_back(&self, anchors: &Anchors, engine: &LayoutEngine) -> Result<Geometry, LayoutError> {
        match *anchors {
            Anchors::Box {
                horizontal: (left, right),
                vertical: (top, bottom),
            } => {
                let (left, right) = (engine.value_of_node(left)?, engine.value_of_node(right)?);
                let (top, bottom) = (engine.value_of_node(top)?, engine.value_of_node(bottom)?);
                Ok(Geometry::Frame(Frame {
                    x: left.round() as i32,
                    y: top.round() as i32,
                    width: (right - left).round() as i32,
                    height: (bottom - top).round() as i32,
                }))
            }
            Anchors::Line { axis, node } => Ok(Geometry::Line {
                axis,
                position: engine.value_of_node(node)?.round() as i32,
            }),
        }
    }
}

/// Edges of one box axis.
fn emit_axis(
    index: usize,
    axis: Axis,
    spec: &AxisSpec,
    (begin, end): (NodeId, NodeId),
    anchors: &[Anchors],
    parent: &Anchors,
    engine: &mut LayoutEngine,
) -> Result<(), LayoutError> {
    let target = |attachment: &Attachment| -> Result<NodeId, LayoutError> {
        let owner = match attachment.element {
            None => Some(parent),
            Some(element) => anchors.get(element.0),
        };
        owner
            .and_then(|owner| owner.side(axis, attachment.side))
            .ok_or(LayoutError::InvalidAttachment {
                index,
                target: attachment.element.map_or(usize::MAX, |element| element.0),
                axis,
            })
    };
    let span = match spec.size {
        Size::Fixed(size) => Some(size),
        Size::Fill => None,
    };
    engine.set_span(begin, span)?;

    match (&spec.begin, &spec.end) {
        (Some(leading), Some(trailing)) => engine.add_resolution_edge(
            begin,
            ResolutionEdge::Center {
                target: target(leading)?,
                margin: leading.margin,
                opposite: end,
                opposite_target: target(trailing)?,
                opposite_margin: trailing.margin,
                bias: spec.bias,
            },
        ),
        (Some(leading), None) => {
            engine.add_resolution_edge(
                begin,
                ResolutionEdge::Direct {
                    target: Some(target(leading)?),
                    offset: leading.margin,
                },
            )?;
            engine.add_resolution_edge(
                end,
                ResolutionEdge::Direct {
                    target: Some(begin),
                    offset: span.unwrap_or(0.0),
                },
            )
        }
        (None, Some(trailing)) => {
            engine.add_resolution_edge(
                end,
                ResolutionEdge::Direct {
                    target: Some(target(trailing)?),
                    offset: -trailing.margin,
                },
            )?;
            engine.add_resolution_edge(
                begin,
                ResolutionEdge::Direct {
                    target: Some(end),
                    offset: -span.unwrap_or(0.0),
                },
            )
        }
        (None, None) => {
            let origin = parent.side(axis, Side::Begin).ok_or(LayoutError::InvalidAttachment {
                index,
                target: usize::MAX,
                axis,
            })?;
            engine.add_resolution_edge(begin, ResolutionEdge::Direct { target: Some(origin), offset: 0.0 })?;
            engine.add_resolution_edge(
                end,
                ResolutionEdge::Direct {
                    target: Some(begin),
                    offset: span.unwrap_or(0.0),
                },
            )
        }
    }
}

/// A fixed-size canvas of elements, laid out as a whole on every
/// `layout` call.
#[derive(Debug, Clone)]
pub struct Scene {
    width: f64,
    height: f64,
    elements: Vec<Element>,
    engine: LayoutEngine,
    geometry: Vec<Geometry>,
}

impl Scene {
    pub fn new(width: f64, height: f64, config: LayoutConfig) -> Self {
        Self {
            width,
            height,
            elements: Vec::new(),
            engine: LayoutEngine::new(config),
            geometry: Vec::new(),
        }
    }

    pub fn add(&mut self, element: Element) -> ElementId {
        self.elements.push(element);
        ElementId(self.elements.len() - 1)
    }

    pub fn resize(&mut self, width: f64, height: f64) {
        self.width = width;
        self.height = height;
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    /// Geometry of the last successful pass, one entry per element.
    pub fn geometry(&self) -> &[Geometry] {
        &self.geometry
    }

    pub fn engine(&self) -> &LayoutEngine {
        &self.engine
    }

    /// Lay out every element. A failed pass leaves the previous geometry in
    /// place.
    #[instrument(skip(self), fields(elements = self.elements.len()))]
    pub fn layout(&mut self) -> Result<&[Geometry], LayoutError> {
        match self.run_pass() {
            Ok(geometry) => {
                self.geometry = geometry;
                Ok(&self.geometry)
            }
            Err(err) => {
                warn!(%err, "layout pass failed, keeping previous geometry");
                Err(err)
            }
        }
    }

    fn run_pass(&mut self) -> Result<Vec<Geometry>, LayoutError> {
        let engine = &mut self.engine;
        engine.begin_pass();

        let parent = Anchors::declare_box(engine)?;
        if let Anchors::Box {
            horizontal: (left, right),
            vertical: (top, bottom),
        } = parent
        {
            for (node, offset) in [(left, 0.0), (right, self.width), (top, 0.0), (bottom, self.height)] {
                engine.add_resolution_edge(node, ResolutionEdge::Direct { target: None, offset })?;
            }
        }

        let anchors = self
            .elements
            .iter()
            .map(|element| element.declare(engine))
            .collect::<Result<Vec<_>, _>>()?;
        for (index, element) in self.elements.iter().enumerate() {
            element.emit(index, &anchors, &parent, engine)?;
        }
        engine.solve()?;

        self.elements
            .iter()
            .zip(&anchors)
            .map(|(element, anchors)| element.read_back(anchors, engine))
            .collect()
    }
}
